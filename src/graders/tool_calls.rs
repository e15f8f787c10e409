//! Efficiency budgets on turns and tool calls.

use serde_json::{json, Map};

use super::{GraderKind, GraderResult};
use crate::error::GraderError;
use crate::runner::{Outcome, Trajectory};
use crate::suite::Task;

pub(super) fn grade(
    trajectory: &Trajectory,
    _outcome: &Outcome,
    task: &Task,
) -> Result<GraderResult, GraderError> {
    let limits = task.tool_calls.ok_or(GraderError::MissingConfig {
        grader: "tool_calls",
        block: "tool_calls",
    })?;

    let mut details = Map::new();
    details.insert("n_turns".to_string(), json!(trajectory.n_turns));
    details.insert("n_tool_calls".to_string(), json!(trajectory.n_tool_calls));
    let mut passed = true;

    if let Some(limit) = limits.max_turns {
        if trajectory.n_turns > limit {
            details.insert(
                "max_turns".to_string(),
                json!({ "limit": limit, "actual": trajectory.n_turns }),
            );
            passed = false;
        }
    }

    if let Some(limit) = limits.max_tool_calls {
        if trajectory.n_tool_calls > limit {
            details.insert(
                "max_tool_calls".to_string(),
                json!({ "limit": limit, "actual": trajectory.n_tool_calls }),
            );
            passed = false;
        }
    }

    Ok(GraderResult::verdict(GraderKind::ToolCalls, passed, details))
}
