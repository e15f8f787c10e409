//! Error types for eval-forge operations.
//!
//! Defines error types for the subsystems that can fail internally:
//! - Suite loading and task validation
//! - Sandbox allocation, copying and teardown
//! - The external agent runner boundary
//! - Individual graders
//! - Sandbox-scoped tools
//! - Result artifact writing
//!
//! Most of these never escape the trial pipeline. The orchestrator turns them
//! into degenerate trials, degraded outcomes or failing verdicts.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while loading a suite definition.
#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("Suite not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to parse suite {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Task '{task_id}' references unknown grader '{name}'")]
    UnknownGrader { task_id: String, name: String },

    #[error("Duplicate task id '{0}' in suite")]
    DuplicateTask(String),

    #[error("Task at position {0} has an empty id")]
    EmptyTaskId(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while provisioning or tearing down a sandbox.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Failed to allocate sandbox directory: {0}")]
    Allocate(String),

    #[error("Baseline directory does not exist: {0}")]
    MissingBaseline(PathBuf),

    #[error("Failed to copy baseline into sandbox: {0}")]
    Copy(String),

    #[error("Cleanup failed: {0}")]
    Cleanup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by an agent runner that could not even produce a partial
/// trajectory.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to spawn agent: {0}")]
    Spawn(String),

    #[error("Agent protocol error: {0}")]
    Protocol(String),

    #[error("Agent execution failed: {0}")]
    ExecutionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors a grader can report instead of a verdict.
#[derive(Debug, Error)]
pub enum GraderError {
    #[error("Grader '{grader}' requires a '{block}' configuration block")]
    MissingConfig {
        grader: &'static str,
        block: &'static str,
    },

    #[error("Grader '{grader}' panicked: {message}")]
    Panicked {
        grader: &'static str,
        message: String,
    },

    #[error("Grader '{0}' is not registered")]
    NotRegistered(&'static str),
}

/// Errors returned by the sandbox-scoped tools.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Path escapes sandbox root: {0}")]
    PathEscape(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Path is a directory, not a file: {0}")]
    IsDirectory(String),

    #[error("Working directory is not a directory: {0}")]
    BadWorkingDir(String),

    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while writing result artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
