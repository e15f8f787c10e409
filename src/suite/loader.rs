//! Load evaluation suites from YAML.
//!
//! Format:
//!
//! ```yaml
//! suite_id: coding
//! tasks:
//!   - id: add-endpoint
//!     name: Add a DELETE endpoint
//!     instruction: |
//!       Add DELETE /todos/{id} and make the tests pass.
//!     graders: [deterministic_tests, tool_calls]
//!     tool_calls:
//!       max_turns: 20
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use super::task::{StateCheckConfig, Task, ToolCallsConfig};
use crate::error::SuiteError;
use crate::graders::GraderKind;

/// A loaded suite.
#[derive(Debug, Clone)]
pub struct Suite {
    /// Suite identifier.
    pub id: String,
    /// Tasks in file order.
    pub tasks: Vec<Task>,
}

#[derive(Debug, Deserialize)]
struct SuiteFile {
    #[serde(default)]
    suite_id: Option<String>,
    #[serde(default)]
    tasks: Vec<TaskSpec>,
}

#[derive(Debug, Deserialize)]
struct TaskSpec {
    id: String,
    name: String,
    instruction: String,
    #[serde(default)]
    system_prompt_override: Option<String>,
    #[serde(default)]
    graders: Option<Vec<String>>,
    #[serde(default)]
    state_check: Option<StateCheckConfig>,
    #[serde(default)]
    tool_calls: Option<ToolCallsConfig>,
}

/// Resolves a suite selector to a file: an existing path is used as is,
/// anything else is looked up as `<suites_dir>/<selector>.yaml`.
pub fn resolve_suite_path(selector: &str, suites_dir: &Path) -> PathBuf {
    let direct = PathBuf::from(selector);
    if direct.is_file() {
        return direct;
    }
    suites_dir.join(format!("{selector}.yaml"))
}

/// Loads a suite by selector.
pub fn load_suite(selector: &str, suites_dir: &Path) -> Result<Suite, SuiteError> {
    let path = resolve_suite_path(selector, suites_dir);
    if !path.is_file() {
        return Err(SuiteError::NotFound(path));
    }

    let content = fs::read_to_string(&path)?;
    let default_id = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| selector.to_string());

    let suite = parse_suite(&content, &default_id).map_err(|e| match e {
        SuiteError::Parse { source, .. } => SuiteError::Parse {
            path: path.clone(),
            source,
        },
        other => other,
    })?;

    info!(
        suite_id = %suite.id,
        tasks = suite.tasks.len(),
        "Loaded suite from {}",
        path.display()
    );
    Ok(suite)
}

/// Parses suite YAML. `default_id` is used when the document has no
/// `suite_id`.
pub fn parse_suite(content: &str, default_id: &str) -> Result<Suite, SuiteError> {
    let file: SuiteFile = serde_yaml::from_str(content).map_err(|source| SuiteError::Parse {
        path: PathBuf::new(),
        source,
    })?;

    let mut seen = HashSet::new();
    let mut tasks = Vec::with_capacity(file.tasks.len());

    for (idx, spec) in file.tasks.into_iter().enumerate() {
        if spec.id.trim().is_empty() {
            return Err(SuiteError::EmptyTaskId(idx));
        }
        if !seen.insert(spec.id.clone()) {
            return Err(SuiteError::DuplicateTask(spec.id));
        }

        let graders = match spec.graders {
            Some(names) => names
                .iter()
                .map(|name| {
                    name.parse::<GraderKind>()
                        .map_err(|_| SuiteError::UnknownGrader {
                            task_id: spec.id.clone(),
                            name: name.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => vec![GraderKind::DeterministicTests],
        };

        debug!(task_id = %spec.id, graders = ?graders, "Parsed task");

        tasks.push(Task {
            id: spec.id,
            name: spec.name,
            instruction: spec.instruction.trim().to_string(),
            system_prompt_override: spec.system_prompt_override,
            graders,
            state_check: spec.state_check,
            tool_calls: spec.tool_calls,
        });
    }

    Ok(Suite {
        id: file.suite_id.unwrap_or_else(|| default_id.to_string()),
        tasks,
    })
}
