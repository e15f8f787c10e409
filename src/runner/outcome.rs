//! Outcome capture: the observable state a sandbox is left in.
//!
//! Capture never fails. A missing test command shows up as the sentinel exit
//! code, an unreadable record store as `records: None`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Column, ConnectOptions, Connection, Row};
use tracing::{debug, warn};

use super::command::run_argv;
use super::config::RunConfig;
use super::result::{truncate, Outcome, Record};
use super::sandbox::changed_files;

/// Database file the target application persists to, relative to its root.
pub const DEFAULT_DB_FILE: &str = "todo.db";
/// Query that snapshots the target's records.
pub const DEFAULT_RECORDS_QUERY: &str = "SELECT id, title, description, completed FROM todos";

/// Reads the target's persisted records out of a sandbox.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns the records in store order, or `None` when the store is
    /// absent or unreadable.
    async fn snapshot(&self, sandbox_root: &Path) -> Option<Vec<Record>>;
}

/// Record store that never has records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRecordStore;

#[async_trait]
impl RecordStore for NoRecordStore {
    async fn snapshot(&self, _sandbox_root: &Path) -> Option<Vec<Record>> {
        None
    }
}

/// Reads records from a SQLite file inside the sandbox.
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    db_file: PathBuf,
    query: String,
}

impl SqliteRecordStore {
    pub fn new(db_file: impl Into<PathBuf>, query: impl Into<String>) -> Self {
        Self {
            db_file: db_file.into(),
            query: query.into(),
        }
    }

    async fn read(&self, path: &Path) -> Result<Vec<Record>, sqlx::Error> {
        let mut conn = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .create_if_missing(false)
            .connect()
            .await?;
        let rows = sqlx::query(&self.query).fetch_all(&mut conn).await?;
        conn.close().await.ok();
        Ok(rows.iter().map(row_to_record).collect())
    }
}

impl Default for SqliteRecordStore {
    fn default() -> Self {
        Self::new(DEFAULT_DB_FILE, DEFAULT_RECORDS_QUERY)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn snapshot(&self, sandbox_root: &Path) -> Option<Vec<Record>> {
        let path = sandbox_root.join(&self.db_file);
        if !path.is_file() {
            debug!("No record store at {}", path.display());
            return None;
        }
        match self.read(&path).await {
            Ok(records) => Some(records),
            Err(e) => {
                warn!("Failed to read record store {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Converts a row into a JSON record without knowing its schema.
fn row_to_record(row: &SqliteRow) -> Record {
    let mut record = Record::new();
    for (i, column) in row.columns().iter().enumerate() {
        record.insert(column.name().to_string(), column_value(row, i));
    }
    record
}

fn column_value(row: &SqliteRow, i: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(i) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(i) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(Some(bytes)) = row.try_get::<Option<Vec<u8>>, _>(i) {
        return Value::String(hex::encode(bytes));
    }
    Value::Null
}

/// Runs the test command and snapshots state once the agent is done.
#[derive(Clone)]
pub struct OutcomeCapture {
    test_command: Vec<String>,
    test_timeout: Duration,
    max_output_bytes: usize,
    store: Arc<dyn RecordStore>,
}

impl OutcomeCapture {
    pub fn new(test_command: Vec<String>, test_timeout: Duration) -> Self {
        Self {
            test_command,
            test_timeout,
            max_output_bytes: super::config::DEFAULT_MAX_OUTPUT_BYTES,
            store: Arc::new(SqliteRecordStore::default()),
        }
    }

    /// Capture settings taken from a run configuration.
    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(config.test_command.clone(), config.test_timeout)
            .with_max_output_bytes(config.max_output_bytes)
    }

    /// Replaces the record store.
    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = store;
        self
    }

    /// Sets the per-stream output limit.
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Captures the outcome of a sandbox rooted at `sandbox_root`, diffing it
    /// against `baseline`.
    pub async fn capture(&self, sandbox_root: &Path, baseline: &Path) -> Outcome {
        let (root, base) = (sandbox_root.to_path_buf(), baseline.to_path_buf());
        let files_changed = tokio::task::spawn_blocking(move || changed_files(&root, &base))
            .await
            .map_err(|e| warn!("Failed to diff sandbox: {}", e))
            .ok();

        let run = run_argv(&self.test_command, sandbox_root, self.test_timeout).await;
        if run.timed_out {
            warn!(
                "Test command timed out after {:.0}s",
                self.test_timeout.as_secs_f64()
            );
        }
        debug!(exit_code = run.exit_code, "Test run complete");

        let records = self.store.snapshot(sandbox_root).await;

        Outcome {
            exit_code: run.exit_code,
            stdout: truncate(&run.stdout, self.max_output_bytes),
            stderr: truncate(&run.stderr, self.max_output_bytes),
            records,
            files_changed,
        }
    }
}

impl std::fmt::Debug for OutcomeCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeCapture")
            .field("test_command", &self.test_command)
            .field("test_timeout", &self.test_timeout)
            .field("max_output_bytes", &self.max_output_bytes)
            .finish()
    }
}
