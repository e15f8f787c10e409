//! Reduction of trial results into task and suite statistics.
//!
//! Aggregation never fails; empty inputs produce zero-valued aggregates.

use serde::{Deserialize, Serialize};

use crate::runner::TrialResult;

/// Statistics over all trials of one task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    /// The trials themselves; persisted separately, per trial.
    #[serde(skip)]
    pub trials: Vec<TrialResult>,
    pub n_trials: usize,
    pub n_passed: usize,
    pub pass_rate: f64,
    pub mean_turns: f64,
    pub mean_tool_calls: f64,
    pub mean_tokens: f64,
    pub mean_latency_sec: f64,
}

/// Statistics over every task of a suite.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteResult {
    pub suite_id: String,
    #[serde(rename = "tasks")]
    pub task_results: Vec<TaskResult>,
    /// Passed trials over all trials, pooled across tasks.
    pub overall_pass_rate: f64,
}

impl SuiteResult {
    /// Total number of trials across tasks.
    pub fn total_trials(&self) -> usize {
        self.task_results.iter().map(|t| t.n_trials).sum()
    }

    /// Total number of passed trials across tasks.
    pub fn total_passed(&self) -> usize {
        self.task_results.iter().map(|t| t.n_passed).sum()
    }

    /// True when every trial of every task passed, and there was at least one.
    pub fn all_passed(&self) -> bool {
        self.overall_pass_rate >= 1.0
    }
}

/// Aggregates the trials of one task.
pub fn aggregate_task(task_id: &str, trials: Vec<TrialResult>) -> TaskResult {
    let n = trials.len();
    if n == 0 {
        return TaskResult {
            task_id: task_id.to_string(),
            ..Default::default()
        };
    }

    let mean = |f: fn(&TrialResult) -> f64| trials.iter().map(f).sum::<f64>() / n as f64;
    let n_passed = trials.iter().filter(|t| t.passed()).count();

    TaskResult {
        task_id: task_id.to_string(),
        n_trials: n,
        n_passed,
        pass_rate: n_passed as f64 / n as f64,
        mean_turns: mean(|t| t.trajectory.n_turns as f64),
        mean_tool_calls: mean(|t| t.trajectory.n_tool_calls as f64),
        mean_tokens: mean(|t| t.trajectory.usage.total() as f64),
        mean_latency_sec: mean(|t| t.trajectory.latency_sec),
        trials,
    }
}

/// Aggregates task results. The overall pass rate is computed over the
/// pooled trial population, so tasks with more trials weigh more.
pub fn aggregate_suite(suite_id: &str, task_results: Vec<TaskResult>) -> SuiteResult {
    let total: usize = task_results.iter().map(|t| t.n_trials).sum();
    let passed: usize = task_results.iter().map(|t| t.n_passed).sum();

    SuiteResult {
        suite_id: suite_id.to_string(),
        task_results,
        overall_pass_rate: if total > 0 {
            passed as f64 / total as f64
        } else {
            0.0
        },
    }
}
