//! Trial execution for agent evaluation.
//!
//! # Architecture
//!
//! ```text
//! Task → TaskRunner → TrialOrchestrator ─┬─ Sandbox (private copy of baseline)
//!                                        ├─ AgentRunner → Trajectory
//!                                        ├─ OutcomeCapture → Outcome
//!                                        └─ GraderRegistry → GraderResult*
//!                                                         → TrialResult
//! ```
//!
//! Each trial:
//! 1. Copies the baseline into a fresh sandbox and installs dependencies
//! 2. Runs the agent under its turn and time budget
//! 3. Runs the test command and snapshots persisted records
//! 4. Runs the task's graders in order
//! 5. Removes the sandbox
//!
//! # Example
//!
//! ```ignore
//! use eval_forge::runner::{ProcessAgentRunner, RunConfig, TaskRunner, TrialOrchestrator};
//!
//! let config = RunConfig::new("./app").with_trials(5);
//! let agent = Arc::new(ProcessAgentRunner::new("my-agent"));
//! let runner = TaskRunner::new(Arc::new(TrialOrchestrator::new(config, agent)));
//!
//! let trials = runner.run_task(&task, Path::new("./app")).await;
//! ```

pub mod agents;
pub mod command;
pub mod config;
pub mod executor;
pub mod outcome;
pub mod result;
pub mod sandbox;
pub mod task_runner;

pub use agents::{AgentRequest, AgentRunner, ProcessAgentRunner};
pub use command::{run_argv, run_shell, CommandOutput};
pub use config::{split_command, RunConfig};
pub use executor::TrialOrchestrator;
pub use outcome::{NoRecordStore, OutcomeCapture, RecordStore, SqliteRecordStore};
pub use result::{Outcome, Record, TokenUsage, Trajectory, TrialResult, SENTINEL_EXIT_CODE};
pub use sandbox::{
    changed_files, FixedRootAllocator, Sandbox, SandboxAllocator, SandboxDir, TempDirAllocator,
};
pub use task_runner::TaskRunner;
