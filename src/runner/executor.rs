//! Trial orchestrator - runs one task once, end to end.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, warn};

use super::agents::{AgentRequest, AgentRunner};
use super::config::RunConfig;
use super::outcome::OutcomeCapture;
use super::result::{Outcome, Trajectory, TrialResult};
use super::sandbox::{Sandbox, SandboxAllocator, TempDirAllocator};
use crate::graders::{GraderRegistry, GraderResult};
use crate::suite::Task;

/// Runs single trials: provision, agent, capture, grade, teardown.
pub struct TrialOrchestrator {
    config: RunConfig,
    agent: Arc<dyn AgentRunner>,
    allocator: Arc<dyn SandboxAllocator>,
    capture: OutcomeCapture,
    registry: Arc<GraderRegistry>,
}

impl TrialOrchestrator {
    /// Creates an orchestrator with temp-dir sandboxes, SQLite record
    /// capture and the built-in graders.
    pub fn new(config: RunConfig, agent: Arc<dyn AgentRunner>) -> Self {
        let capture = OutcomeCapture::from_config(&config);
        Self {
            config,
            agent,
            allocator: Arc::new(TempDirAllocator::new()),
            capture,
            registry: Arc::new(GraderRegistry::builtin()),
        }
    }

    /// Replaces the sandbox allocator.
    pub fn with_allocator(mut self, allocator: Arc<dyn SandboxAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Replaces the outcome capture.
    pub fn with_capture(mut self, capture: OutcomeCapture) -> Self {
        self.capture = capture;
        self
    }

    /// Replaces the grader registry.
    pub fn with_registry(mut self, registry: Arc<GraderRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Returns the run configuration.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Runs one trial of `task` against a private copy of `baseline`.
    ///
    /// Never fails: a sandbox that cannot be provisioned yields a degenerate
    /// result whose outcome carries the sentinel exit code and the error, and
    /// whose graders all fail.
    pub async fn run_trial(&self, task: &Task, trial_index: usize, baseline: &Path) -> TrialResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let label = format!("{}_{}", task.id, trial_index);

        info!(task_id = %task.id, trial = trial_index, "Starting trial");

        let sandbox =
            match Sandbox::provision(self.allocator.as_ref(), &label, baseline, &self.config).await
            {
                Ok(sandbox) => sandbox,
                Err(e) => {
                    error!(task_id = %task.id, trial = trial_index, "Sandbox setup failed: {}", e);
                    let message = format!("sandbox setup failed: {}", e);
                    let grader_results = task
                        .graders
                        .iter()
                        .map(|&kind| GraderResult::error(kind, &message))
                        .collect();
                    return TrialResult {
                        task_id: task.id.clone(),
                        trial_index,
                        started_at,
                        duration_sec: start.elapsed().as_secs_f64(),
                        trajectory: Trajectory::aborted(&message, 0.0),
                        outcome: Outcome::failed(message),
                        grader_results,
                    };
                }
            };

        let trajectory = self.run_agent(task, &sandbox).await;
        let outcome = self.capture.capture(sandbox.root(), sandbox.baseline()).await;
        let grader_results = self.registry.grade_all(task, &trajectory, &outcome);

        if let Err(e) = sandbox.teardown().await {
            warn!(task_id = %task.id, trial = trial_index, "Sandbox teardown failed: {}", e);
        }

        let result = TrialResult {
            task_id: task.id.clone(),
            trial_index,
            started_at,
            duration_sec: start.elapsed().as_secs_f64(),
            trajectory,
            outcome,
            grader_results,
        };

        info!(
            task_id = %task.id,
            trial = trial_index,
            passed = result.passed(),
            n_turns = result.trajectory.n_turns,
            exit_code = result.outcome.exit_code,
            "Trial complete"
        );
        result
    }

    async fn run_agent(&self, task: &Task, sandbox: &Sandbox) -> Trajectory {
        let request = AgentRequest {
            instruction: task.instruction.clone(),
            sandbox_root: sandbox.root().to_path_buf(),
            system_prompt: task
                .effective_system_prompt(&self.config.default_system_prompt)
                .to_string(),
            model: self.config.model.clone(),
            max_turns: self.config.max_turns,
            timeout_sec: self.config.timeout.as_secs_f64(),
        };

        let start = Instant::now();
        match self.agent.run(&request).await {
            Ok(trajectory) => {
                if !trajectory.finished {
                    warn!(
                        task_id = %task.id,
                        "Agent did not finish: {}",
                        trajectory.error.as_deref().unwrap_or("budget exhausted")
                    );
                }
                trajectory
            }
            Err(e) => {
                error!(task_id = %task.id, "Agent runner failed: {}", e);
                Trajectory::aborted(e.to_string(), start.elapsed().as_secs_f64())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::graders::GraderKind;
    use crate::runner::outcome::NoRecordStore;
    use crate::runner::result::{TokenUsage, SENTINEL_EXIT_CODE};
    use crate::suite::ToolCallsConfig;
    use async_trait::async_trait;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    struct FixedAgent(Result<Trajectory, String>);

    #[async_trait]
    impl AgentRunner for FixedAgent {
        async fn run(&self, request: &AgentRequest) -> Result<Trajectory, AgentError> {
            fs::write(request.sandbox_root.join("touched.txt"), &request.system_prompt).unwrap();
            self.0.clone().map_err(AgentError::ExecutionFailed)
        }
    }

    fn finished(n_turns: u32) -> Trajectory {
        Trajectory {
            messages: Vec::new(),
            n_turns,
            n_tool_calls: 0,
            usage: TokenUsage::new(10, 5),
            latency_sec: 0.1,
            finished: true,
            error: None,
        }
    }

    fn orchestrator(agent: FixedAgent, test_script: &str, baseline: &Path) -> TrialOrchestrator {
        let config = RunConfig::new(baseline).with_install_command(Vec::new());
        let capture = OutcomeCapture::new(
            vec!["sh".into(), "-c".into(), test_script.into()],
            Duration::from_secs(10),
        )
        .with_store(Arc::new(NoRecordStore));
        TrialOrchestrator::new(config, Arc::new(agent)).with_capture(capture)
    }

    fn baseline() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.py"), "x = 1\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_successful_trial() {
        let base = baseline();
        let orch = orchestrator(FixedAgent(Ok(finished(2))), "test -f touched.txt", base.path());
        let task = Task::new("t1", "T", "do it").with_system_prompt("custom prompt");

        let result = orch.run_trial(&task, 4, base.path()).await;
        assert_eq!(result.task_id, "t1");
        assert_eq!(result.trial_index, 4);
        assert_eq!(result.outcome.exit_code, 0);
        assert_eq!(result.outcome.files_changed, Some(vec!["touched.txt".to_string()]));
        assert!(result.passed());
        assert!(!base.path().join("touched.txt").exists());
    }

    #[tokio::test]
    async fn test_agent_error_is_still_captured_and_graded() {
        let base = baseline();
        let orch = orchestrator(FixedAgent(Err("model unavailable".into())), "exit 1", base.path());
        let task = Task::new("t1", "T", "do it");

        let result = orch.run_trial(&task, 0, base.path()).await;
        assert!(!result.trajectory.finished);
        assert!(result.trajectory.error.as_deref().unwrap().contains("model unavailable"));
        assert_eq!(result.outcome.exit_code, 1);
        assert_eq!(result.grader_results.len(), 1);
        assert!(!result.passed());
    }

    #[tokio::test]
    async fn test_sandbox_failure_yields_degenerate_result() {
        let missing = Path::new("/definitely/not/a/baseline");
        let orch = orchestrator(FixedAgent(Ok(finished(1))), "true", missing);
        let task = Task::new("t1", "T", "do it").with_graders(vec![
            GraderKind::DeterministicTests,
            GraderKind::ToolCalls,
        ]);

        let result = orch.run_trial(&task, 1, missing).await;
        assert_eq!(result.outcome.exit_code, SENTINEL_EXIT_CODE);
        assert!(result.outcome.stderr.contains("sandbox setup failed"));
        assert!(!result.trajectory.finished);
        assert_eq!(result.grader_results.len(), 2);
        assert!(result.grader_results.iter().all(|g| !g.passed));
        assert!(!result.passed());
    }

    #[tokio::test]
    async fn test_sandbox_failure_with_no_graders_passes_vacuously() {
        let missing = Path::new("/definitely/not/a/baseline");
        let orch = orchestrator(FixedAgent(Ok(finished(1))), "true", missing);
        let task = Task::new("t1", "T", "do it").with_graders(Vec::new());

        let result = orch.run_trial(&task, 0, missing).await;
        assert_eq!(result.outcome.exit_code, SENTINEL_EXIT_CODE);
        assert!(result.passed());
    }

    #[tokio::test]
    async fn test_graders_run_in_task_order() {
        let base = baseline();
        let orch = orchestrator(FixedAgent(Ok(finished(9))), "true", base.path());
        let task = Task::new("t1", "T", "do it")
            .with_graders(vec![GraderKind::ToolCalls, GraderKind::DeterministicTests])
            .with_tool_calls(ToolCallsConfig {
                max_turns: Some(3),
                max_tool_calls: None,
            });

        let result = orch.run_trial(&task, 0, base.path()).await;
        let names: Vec<_> = result
            .grader_results
            .iter()
            .map(|g| g.grader_name.as_str())
            .collect();
        assert_eq!(names, vec!["tool_calls", "deterministic_tests"]);
        assert!(!result.grader_results[0].passed);
        assert!(result.grader_results[1].passed);
        assert!(!result.passed());
    }
}
