//! The agent runner boundary.
//!
//! An [`AgentRunner`] drives one autonomous agent run inside a sandbox and
//! hands back its [`Trajectory`]. Ordinary failures (running out of turns or
//! time, failing tool calls) are part of the trajectory, not errors; `Err` is
//! reserved for runs that could not start at all.

pub mod process;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::result::Trajectory;
use crate::error::AgentError;

pub use process::ProcessAgentRunner;

/// Everything an agent needs for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    /// Task instruction, sent as the first user message.
    pub instruction: String,
    /// Root of the sandbox the agent may touch.
    pub sandbox_root: PathBuf,
    /// Effective system prompt.
    pub system_prompt: String,
    /// Model identifier.
    pub model: String,
    /// Turn budget.
    pub max_turns: u32,
    /// Wall-clock budget in seconds.
    pub timeout_sec: f64,
}

impl AgentRequest {
    /// Wall-clock budget as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_sec.max(0.0))
    }
}

/// Runs an agent against a sandbox.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Runs the agent to completion or until a budget is exhausted. On
    /// timeout the implementation returns the partial transcript with
    /// `finished = false`.
    async fn run(&self, request: &AgentRequest) -> Result<Trajectory, AgentError>;
}

/// Counts assistant turns and tool calls in an OpenAI-style transcript.
pub fn count_turns_and_tool_calls(messages: &[Value]) -> (u32, u32) {
    let mut turns = 0u32;
    let mut tool_calls = 0u32;
    for message in messages {
        if message.get("role").and_then(Value::as_str) != Some("assistant") {
            continue;
        }
        turns += 1;
        if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
            tool_calls += calls.len() as u32;
        }
    }
    (turns, tool_calls)
}
