//! Passes iff the target's test command exited with 0.

use serde_json::{json, Map};

use super::{GraderKind, GraderResult};
use crate::error::GraderError;
use crate::runner::{Outcome, Trajectory};
use crate::suite::Task;

pub(super) fn grade(
    _trajectory: &Trajectory,
    outcome: &Outcome,
    _task: &Task,
) -> Result<GraderResult, GraderError> {
    let mut details = Map::new();
    details.insert("exit_code".to_string(), json!(outcome.exit_code));

    Ok(GraderResult::verdict(
        GraderKind::DeterministicTests,
        outcome.exit_code == 0,
        details,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graders::test_support::{outcome, trajectory};

    #[test]
    fn test_zero_exit_code_passes() {
        let result = grade(&trajectory(1, 1), &outcome(0, None), &Task::new("t", "T", "x")).unwrap();
        assert!(result.passed);
        assert_eq!(result.score, 1.0);
        assert_eq!(result.details["exit_code"], 0);
    }

    #[test]
    fn test_any_nonzero_exit_code_fails() {
        let task = Task::new("t", "T", "x");
        for code in [1, 2, 5, 127, 255, -1, -9, -15, i32::MIN, i32::MAX] {
            let result = grade(&trajectory(1, 1), &outcome(code, None), &task).unwrap();
            assert!(!result.passed, "exit code {code} should fail");
            assert_eq!(result.score, 0.0);
            assert_eq!(result.details["exit_code"], code);
        }
    }
}
