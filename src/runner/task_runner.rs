//! Task runner - N trials of one task, optionally in parallel.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::info;

use super::executor::TrialOrchestrator;
use super::result::TrialResult;
use crate::suite::Task;

/// Drives the trials of a task through a [`TrialOrchestrator`].
pub struct TaskRunner {
    orchestrator: Arc<TrialOrchestrator>,
}

impl TaskRunner {
    pub fn new(orchestrator: Arc<TrialOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Runs `config.trials_per_task` trials of `task` against `baseline`,
    /// at most `config.concurrency` at a time. Results are ordered by trial
    /// index regardless of completion order.
    pub async fn run_task(&self, task: &Task, baseline: &Path) -> Vec<TrialResult> {
        let config = self.orchestrator.config();
        let trials = config.trials_per_task;
        let concurrency = config.concurrency.max(1);

        info!(
            task_id = %task.id,
            trials,
            concurrency,
            "Running task"
        );

        if concurrency == 1 {
            let mut results = Vec::with_capacity(trials);
            for index in 0..trials {
                results.push(self.orchestrator.run_trial(task, index, baseline).await);
            }
            return results;
        }

        let sem = Arc::new(Semaphore::new(concurrency));
        let futures: Vec<_> = (0..trials)
            .map(|index| {
                let sem = sem.clone();
                let orchestrator = self.orchestrator.clone();
                async move {
                    let _permit = sem.acquire().await.ok();
                    orchestrator.run_trial(task, index, baseline).await
                }
            })
            .collect();

        let mut results = futures::future::join_all(futures).await;
        results.sort_by_key(|r| r.trial_index);
        results
    }
}
