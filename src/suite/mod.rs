//! Suite and task definitions.
//!
//! A suite is a named, ordered list of tasks loaded from YAML. Grader names
//! are resolved against the closed set of [`GraderKind`]s while loading, so a
//! typo in a suite file fails before any trial runs.
//!
//! [`GraderKind`]: crate::graders::GraderKind

mod loader;
mod task;

pub use loader::{load_suite, parse_suite, resolve_suite_path, Suite};
pub use task::{StateCheckConfig, Task, ToolCallsConfig};
