//! On-disk result artifacts.
//!
//! Layout under the output directory:
//!
//! ```text
//! <run_id>/
//!   summary.json
//!   <task_id>/trial_<i>/trajectory.json
//!   <task_id>/trial_<i>/outcome.json
//!   <task_id>/trial_<i>/grader_results.json
//! ```

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tokio::fs;
use tracing::debug;

use crate::aggregate::{SuiteResult, TaskResult};
use crate::error::ArtifactError;
use crate::runner::TrialResult;

/// Returns a fresh run id, the current UTC time as `YYYYMMDD_HHMMSS`.
pub fn new_run_id() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// The `summary.json` document.
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub suite_id: &'a str,
    pub run_id: &'a str,
    pub overall_pass_rate: f64,
    pub total_trials: usize,
    pub total_passed: usize,
    pub tasks: &'a [TaskResult],
}

impl<'a> RunSummary<'a> {
    pub fn new(run_id: &'a str, suite: &'a SuiteResult) -> Self {
        Self {
            suite_id: &suite.suite_id,
            run_id,
            overall_pass_rate: suite.overall_pass_rate,
            total_trials: suite.total_trials(),
            total_passed: suite.total_passed(),
            tasks: &suite.task_results,
        }
    }
}

/// Writes the artifacts of one run.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    run_id: String,
    run_dir: PathBuf,
}

impl ArtifactWriter {
    /// Creates `<output_dir>/<run_id>`.
    pub async fn create(output_dir: &Path, run_id: impl Into<String>) -> Result<Self, ArtifactError> {
        let run_id = run_id.into();
        let run_dir = output_dir.join(&run_id);
        fs::create_dir_all(&run_dir).await?;
        Ok(Self { run_id, run_dir })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Directory holding the artifacts of one trial.
    pub fn trial_dir(&self, task_id: &str, trial_index: usize) -> PathBuf {
        self.run_dir
            .join(path_component(task_id))
            .join(format!("trial_{}", trial_index))
    }

    /// Writes the transcript, outcome and verdicts of one trial.
    pub async fn write_trial(&self, trial: &TrialResult) -> Result<PathBuf, ArtifactError> {
        let dir = self.trial_dir(&trial.task_id, trial.trial_index);
        fs::create_dir_all(&dir).await?;

        write_json(&dir.join("trajectory.json"), &trial.trajectory).await?;
        write_json(&dir.join("outcome.json"), &trial.outcome).await?;
        write_json(&dir.join("grader_results.json"), &trial.grader_results).await?;

        debug!("Wrote trial artifacts to {}", dir.display());
        Ok(dir)
    }

    /// Writes `summary.json`.
    pub async fn write_summary(&self, suite: &SuiteResult) -> Result<PathBuf, ArtifactError> {
        let path = self.run_dir.join("summary.json");
        write_json(&path, &RunSummary::new(&self.run_id, suite)).await?;
        Ok(path)
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ArtifactError> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).await?;
    Ok(())
}

fn path_component(id: &str) -> String {
    match id {
        "." | ".." => "_".to_string(),
        _ => id.replace(['/', '\\'], "_"),
    }
}
