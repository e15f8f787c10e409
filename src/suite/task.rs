//! Task definition and grader configuration blocks.

use serde::{Deserialize, Serialize};

use crate::graders::GraderKind;

/// A single evaluation task: what the agent is asked to do and how the result
/// is judged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Stable identifier, unique within a suite.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Natural-language instruction given to the agent.
    pub instruction: String,
    /// Replaces the harness default system prompt when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_override: Option<String>,
    /// Graders to apply, in order.
    pub graders: Vec<GraderKind>,
    /// Configuration for the `state_check` grader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_check: Option<StateCheckConfig>,
    /// Configuration for the `tool_calls` grader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<ToolCallsConfig>,
}

impl Task {
    /// Creates a task graded by `deterministic_tests` only.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            instruction: instruction.into(),
            system_prompt_override: None,
            graders: vec![GraderKind::DeterministicTests],
            state_check: None,
            tool_calls: None,
        }
    }

    /// Sets the graders to apply.
    pub fn with_graders(mut self, graders: Vec<GraderKind>) -> Self {
        self.graders = graders;
        self
    }

    /// Sets the system prompt override.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt_override = Some(prompt.into());
        self
    }

    /// Sets the `state_check` block.
    pub fn with_state_check(mut self, config: StateCheckConfig) -> Self {
        self.state_check = Some(config);
        self
    }

    /// Sets the `tool_calls` block.
    pub fn with_tool_calls(mut self, config: ToolCallsConfig) -> Self {
        self.tool_calls = Some(config);
        self
    }

    /// Returns the system prompt the agent should see.
    pub fn effective_system_prompt<'a>(&'a self, default: &'a str) -> &'a str {
        self.system_prompt_override.as_deref().unwrap_or(default)
    }
}

/// Predicates over the captured record snapshot. Unset predicates are not
/// checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateCheckConfig {
    /// No record may have a missing, null or empty `title`.
    #[serde(default)]
    pub no_empty_titles: bool,
    /// Minimum number of records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_todos: Option<usize>,
    /// Maximum number of records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_todos: Option<usize>,
}

/// Efficiency ceilings for the `tool_calls` grader. Both bounds are
/// inclusive; unset limits are not checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolCallsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<u32>,
}
