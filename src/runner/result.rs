//! Results and transcripts for trials.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::graders::GraderResult;

/// Exit code recorded when no real test run could take place (sandbox
/// failure, test command missing or timed out).
pub const SENTINEL_EXIT_CODE: i32 = -1;

/// One persisted record of the target application, column name to value.
pub type Record = Map<String, Value>;

/// Token usage statistics reported by the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Completion tokens.
    #[serde(default)]
    pub completion_tokens: u64,
    /// Total tokens. Agents that only report the split leave this at zero.
    #[serde(default)]
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Creates new token usage stats.
    pub fn new(prompt: u64, completion: u64) -> Self {
        Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    }

    /// Returns total tokens used, falling back to the split when no total
    /// was reported.
    pub fn total(&self) -> u64 {
        if self.total_tokens > 0 {
            self.total_tokens
        } else {
            self.prompt_tokens + self.completion_tokens
        }
    }
}

/// Transcript and metrics of one agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    /// Full message transcript, in the agent's own message format.
    pub messages: Vec<Value>,
    /// Number of assistant turns.
    pub n_turns: u32,
    /// Number of tool calls issued across all turns.
    pub n_tool_calls: u32,
    /// Token usage.
    pub usage: TokenUsage,
    /// Wall-clock duration of the agent run in seconds.
    pub latency_sec: f64,
    /// False when the budget ran out before a final answer.
    pub finished: bool,
    /// Why the run ended abnormally, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Trajectory {
    /// An unfinished trajectory with no transcript, used when the agent could
    /// not run at all.
    pub fn aborted(error: impl Into<String>, latency_sec: f64) -> Self {
        Self {
            messages: Vec::new(),
            n_turns: 0,
            n_tool_calls: 0,
            usage: TokenUsage::default(),
            latency_sec,
            finished: false,
            error: Some(error.into()),
        }
    }
}

/// Final observable state of the environment after one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Exit code of the target's test command.
    pub exit_code: i32,
    /// Captured stdout of the test command.
    pub stdout: String,
    /// Captured stderr of the test command.
    pub stderr: String,
    /// Snapshot of the target's persisted records, `None` if unavailable.
    pub records: Option<Vec<Record>>,
    /// Files created or modified in the sandbox relative to the baseline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_changed: Option<Vec<String>>,
}

impl Outcome {
    /// Outcome for a trial whose environment never came up.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            exit_code: SENTINEL_EXIT_CODE,
            stdout: String::new(),
            stderr: error.into(),
            records: None,
            files_changed: None,
        }
    }
}

/// The unit of record: one run of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialResult {
    /// Task identifier.
    pub task_id: String,
    /// 0-based index, unique within a task.
    pub trial_index: usize,
    /// When the trial started.
    pub started_at: DateTime<Utc>,
    /// Total wall-clock duration of the trial, provisioning included.
    pub duration_sec: f64,
    /// Agent transcript.
    pub trajectory: Trajectory,
    /// Captured environment state.
    pub outcome: Outcome,
    /// One verdict per configured grader, in the task's order.
    pub grader_results: Vec<GraderResult>,
}

impl TrialResult {
    /// True iff every grader passed. A trial with no graders passes
    /// vacuously.
    pub fn passed(&self) -> bool {
        self.grader_results.iter().all(|g| g.passed)
    }
}

/// Truncates a captured stream to at most `max_len` bytes on a char boundary.
pub(crate) fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let mut end = max_len;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}... [truncated]", &s[..end])
    }
}
