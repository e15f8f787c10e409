//! eval-forge: evaluation harness for autonomous coding agents.
//!
//! Runs every task of a suite several times, each trial in a private copy of
//! a baseline app, grades the resulting transcript and environment state, and
//! aggregates pass rates per task and per suite.

// Core modules
pub mod aggregate;
pub mod artifacts;
pub mod cli;
pub mod error;
pub mod graders;
pub mod runner;
pub mod suite;
pub mod tools;

// Re-export commonly used types
pub use aggregate::{aggregate_suite, aggregate_task, SuiteResult, TaskResult};
pub use error::{AgentError, ArtifactError, GraderError, SandboxError, SuiteError, ToolError};
pub use graders::{GraderKind, GraderRegistry, GraderResult};
pub use runner::{
    AgentRequest, AgentRunner, Outcome, RunConfig, TaskRunner, TrialOrchestrator, TrialResult,
    Trajectory,
};
pub use suite::{load_suite, Suite, Task};
