//! Assertions on the captured record snapshot.
//!
//! A missing snapshot is judged as zero records, so `min_todos` fails and
//! `no_empty_titles` / `max_todos` hold vacuously. `records_available` in the
//! details tells the two situations apart.

use serde_json::{json, Map, Value};

use super::{GraderKind, GraderResult};
use crate::error::GraderError;
use crate::runner::{Outcome, Record, Trajectory};
use crate::suite::Task;

pub(super) fn grade(
    _trajectory: &Trajectory,
    outcome: &Outcome,
    task: &Task,
) -> Result<GraderResult, GraderError> {
    let config = task.state_check.as_ref().ok_or(GraderError::MissingConfig {
        grader: "state_check",
        block: "state_check",
    })?;

    let records: &[Record] = outcome.records.as_deref().unwrap_or(&[]);
    let count = records.len();
    let mut details = Map::new();
    let mut passed = true;

    details.insert(
        "records_available".to_string(),
        Value::Bool(outcome.records.is_some()),
    );

    if config.no_empty_titles {
        let ok = !records.iter().any(has_empty_title);
        details.insert("no_empty_titles".to_string(), Value::Bool(ok));
        passed &= ok;
    }

    if let Some(min) = config.min_todos {
        details.insert(
            "min_todos".to_string(),
            json!({ "expected": min, "actual": count }),
        );
        passed &= count >= min;
    }

    if let Some(max) = config.max_todos {
        details.insert(
            "max_todos".to_string(),
            json!({ "expected": max, "actual": count }),
        );
        passed &= count <= max;
    }

    Ok(GraderResult::verdict(GraderKind::StateCheck, passed, details))
}

fn has_empty_title(record: &Record) -> bool {
    match record.get("title") {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}
