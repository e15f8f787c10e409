//! Graders: pure scoring functions over a finished trial.
//!
//! Every grader has the same shape, `(Trajectory, Outcome, Task) ->
//! GraderResult`, reads only its inputs and keeps no state. Kinds form a
//! closed set; the [`GraderRegistry`] maps each kind to its function once at
//! startup and isolates failures so one broken grader cannot take the others
//! down.

mod deterministic_tests;
mod state_check;
mod tool_calls;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::GraderError;
use crate::runner::{Outcome, Trajectory};
use crate::suite::Task;

/// Signature shared by every grader.
pub type GradeFn = fn(&Trajectory, &Outcome, &Task) -> Result<GraderResult, GraderError>;

/// Known grader kinds, addressed in suites by their stable name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraderKind {
    /// Passes iff the target's test command exited with 0.
    DeterministicTests,
    /// Predicates over the persisted record snapshot.
    StateCheck,
    /// Turn and tool-call budgets.
    ToolCalls,
}

impl GraderKind {
    /// Every kind, in registration order.
    pub const ALL: [GraderKind; 3] = [
        GraderKind::DeterministicTests,
        GraderKind::StateCheck,
        GraderKind::ToolCalls,
    ];

    /// Stable name used in suite files and results.
    pub fn as_str(&self) -> &'static str {
        match self {
            GraderKind::DeterministicTests => "deterministic_tests",
            GraderKind::StateCheck => "state_check",
            GraderKind::ToolCalls => "tool_calls",
        }
    }
}

impl std::fmt::Display for GraderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GraderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GraderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Unknown grader: {}", s))
    }
}

/// One grader's verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraderResult {
    /// Stable grader name.
    pub grader_name: String,
    /// Whether the grader passed.
    pub passed: bool,
    /// Score in [0, 1].
    pub score: f64,
    /// Free-form diagnostics.
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl GraderResult {
    /// A binary verdict: score 1.0 when passed, 0.0 otherwise.
    pub fn verdict(kind: GraderKind, passed: bool, details: Map<String, Value>) -> Self {
        Self {
            grader_name: kind.as_str().to_string(),
            passed,
            score: if passed { 1.0 } else { 0.0 },
            details,
        }
    }

    /// A failing verdict carrying the reason the grader could not judge.
    pub fn error(kind: GraderKind, error: impl std::fmt::Display) -> Self {
        let mut details = Map::new();
        details.insert("error".to_string(), Value::String(error.to_string()));
        Self::verdict(kind, false, details)
    }
}

/// Lookup table from grader kind to grading function.
pub struct GraderRegistry {
    graders: HashMap<GraderKind, GradeFn>,
}

impl GraderRegistry {
    /// Creates an empty registry.
    pub fn empty() -> Self {
        Self {
            graders: HashMap::new(),
        }
    }

    /// Creates a registry with every built-in grader.
    pub fn builtin() -> Self {
        Self::empty()
            .with(GraderKind::DeterministicTests, deterministic_tests::grade)
            .with(GraderKind::StateCheck, state_check::grade)
            .with(GraderKind::ToolCalls, tool_calls::grade)
    }

    /// Registers (or replaces) the function for a kind.
    pub fn with(mut self, kind: GraderKind, grade: GradeFn) -> Self {
        self.graders.insert(kind, grade);
        self
    }

    /// Returns the function for a kind.
    pub fn get(&self, kind: GraderKind) -> Option<GradeFn> {
        self.graders.get(&kind).copied()
    }

    /// Runs one grader. Errors and panics become a failing verdict for this
    /// grader only.
    pub fn grade(
        &self,
        kind: GraderKind,
        trajectory: &Trajectory,
        outcome: &Outcome,
        task: &Task,
    ) -> GraderResult {
        let Some(grade) = self.get(kind) else {
            return GraderResult::error(kind, GraderError::NotRegistered(kind.as_str()));
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| grade(trajectory, outcome, task)))
            .unwrap_or_else(|payload| {
                Err(GraderError::Panicked {
                    grader: kind.as_str(),
                    message: panic_message(payload.as_ref()),
                })
            });

        match result {
            Ok(verdict) => {
                debug!(
                    task_id = %task.id,
                    grader = kind.as_str(),
                    passed = verdict.passed,
                    "Grader finished"
                );
                verdict
            }
            Err(e) => {
                warn!(task_id = %task.id, grader = kind.as_str(), error = %e, "Grader failed");
                GraderResult::error(kind, e)
            }
        }
    }

    /// Runs every grader configured on the task, in the task's order.
    pub fn grade_all(
        &self,
        task: &Task,
        trajectory: &Trajectory,
        outcome: &Outcome,
    ) -> Vec<GraderResult> {
        task.graders
            .iter()
            .map(|&kind| self.grade(kind, trajectory, outcome, task))
            .collect()
    }
}

impl Default for GraderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{outcome, trajectory};
    use super::*;

    fn panicking_grader(_: &Trajectory, _: &Outcome, _: &Task) -> Result<GraderResult, GraderError> {
        panic!("predicate blew up");
    }

    #[test]
    fn test_grader_kind_names_round_trip() {
        for kind in GraderKind::ALL {
            assert_eq!(kind.as_str().parse::<GraderKind>().unwrap(), kind);
            assert_eq!(kind.to_string(), kind.as_str());
        }
        assert!("llm_judge".parse::<GraderKind>().is_err());
    }

    #[test]
    fn test_builtin_registry_has_every_kind() {
        let registry = GraderRegistry::builtin();
        for kind in GraderKind::ALL {
            assert!(registry.get(kind).is_some(), "missing {kind}");
        }
    }

    #[test]
    fn test_grade_all_preserves_task_order() {
        let task = Task::new("t", "T", "x")
            .with_graders(vec![GraderKind::ToolCalls, GraderKind::DeterministicTests])
            .with_tool_calls(Default::default());
        let results =
            GraderRegistry::builtin().grade_all(&task, &trajectory(1, 1), &outcome(0, None));
        let names: Vec<_> = results.iter().map(|r| r.grader_name.as_str()).collect();
        assert_eq!(names, vec!["tool_calls", "deterministic_tests"]);
    }

    #[test]
    fn test_panicking_grader_is_isolated() {
        let registry = GraderRegistry::builtin().with(GraderKind::StateCheck, panicking_grader);
        let task = Task::new("t", "T", "x").with_graders(vec![
            GraderKind::StateCheck,
            GraderKind::DeterministicTests,
        ]);

        let results = registry.grade_all(&task, &trajectory(1, 0), &outcome(0, None));

        assert_eq!(results.len(), 2);
        assert!(!results[0].passed);
        assert_eq!(results[0].score, 0.0);
        let error = results[0].details["error"].as_str().unwrap();
        assert!(error.contains("predicate blew up"));
        assert!(results[1].passed);
    }

    #[test]
    fn test_unregistered_grader_fails_closed() {
        let registry = GraderRegistry::empty();
        let task = Task::new("t", "T", "x");
        let result = registry.grade(
            GraderKind::DeterministicTests,
            &trajectory(0, 0),
            &outcome(0, None),
            &task,
        );
        assert!(!result.passed);
        assert!(result.details.contains_key("error"));
    }
}
