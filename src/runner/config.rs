//! Configuration for evaluation runs.
//!
//! Defaults live here as constants and are applied once, when the CLI builds
//! a [`RunConfig`]. Nothing below the CLI reads them implicitly.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default model identifier passed to the agent.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
/// Default turn budget per trial.
pub const DEFAULT_MAX_TURNS: u32 = 50;
/// Default agent timeout per trial, in seconds.
pub const DEFAULT_TIMEOUT_SECS: f64 = 600.0;
/// Default number of trials per task.
pub const DEFAULT_TRIALS_PER_TASK: usize = 3;
/// Default number of trials of one task allowed to run at once.
pub const DEFAULT_CONCURRENCY: usize = 1;
/// Ceiling for the one-time dependency install in a fresh sandbox.
pub const DEFAULT_INSTALL_TIMEOUT_SECS: u64 = 60;
/// Ceiling for the outcome-capture test run.
pub const DEFAULT_TEST_TIMEOUT_SECS: u64 = 120;
/// Captured test output is cut at this many bytes per stream.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 100_000;

/// System prompt used when a task has no override.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert coding agent. The app is in ../app. \
When running tests or server commands, ALWAYS prepend poetry run (e.g. poetry run pytest).";

/// Configuration threaded through every stage of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Model identifier forwarded to the agent runner.
    pub model: String,
    /// Maximum agent turns per trial.
    pub max_turns: u32,
    /// Agent wall-clock budget per trial.
    pub timeout: Duration,
    /// Trials per task.
    pub trials_per_task: usize,
    /// Maximum trials of one task in flight at once.
    pub concurrency: usize,
    /// Read-only baseline copied into every sandbox.
    pub baseline_dir: PathBuf,
    /// System prompt used when a task has no override.
    pub default_system_prompt: String,
    /// Dependency install run once per sandbox, before the agent. Empty
    /// disables the step.
    pub install_command: Vec<String>,
    /// Ceiling for the install command.
    pub install_timeout: Duration,
    /// Command that runs the target's test suite.
    pub test_command: Vec<String>,
    /// Ceiling for the test command, independent of the agent timeout.
    pub test_timeout: Duration,
    /// Per-stream truncation limit for captured test output.
    pub max_output_bytes: usize,
}

impl RunConfig {
    /// Creates a configuration with defaults for the given baseline.
    pub fn new(baseline_dir: impl Into<PathBuf>) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_turns: DEFAULT_MAX_TURNS,
            timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
            trials_per_task: DEFAULT_TRIALS_PER_TASK,
            concurrency: DEFAULT_CONCURRENCY,
            baseline_dir: baseline_dir.into(),
            default_system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            install_command: split_command("poetry install --no-interaction"),
            install_timeout: Duration::from_secs(DEFAULT_INSTALL_TIMEOUT_SECS),
            test_command: split_command("poetry run pytest -v"),
            test_timeout: Duration::from_secs(DEFAULT_TEST_TIMEOUT_SECS),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// Sets the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the turn budget.
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Sets the agent timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the number of trials per task.
    pub fn with_trials(mut self, trials: usize) -> Self {
        self.trials_per_task = trials;
        self
    }

    /// Sets the trial concurrency. Values below 1 are raised to 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the default system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.default_system_prompt = prompt.into();
        self
    }

    /// Sets the install command; an empty command skips installation.
    pub fn with_install_command(mut self, command: Vec<String>) -> Self {
        self.install_command = command;
        self
    }

    /// Sets the install ceiling.
    pub fn with_install_timeout(mut self, timeout: Duration) -> Self {
        self.install_timeout = timeout;
        self
    }

    /// Sets the test command.
    pub fn with_test_command(mut self, command: Vec<String>) -> Self {
        self.test_command = command;
        self
    }

    /// Sets the test ceiling.
    pub fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = timeout;
        self
    }

    /// Sets the per-stream output limit.
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::new("./app")
    }
}

/// Splits a command line on whitespace. Quoting is not interpreted.
pub fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(String::from).collect()
}
