//! Durable progress snapshot consumed by the read-only status reporter.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::status::IterationStatus;

/// Last-known iteration state (`.pilot/state/last_iteration.json`).
///
/// Overwritten on every terminal branch of every iteration; this is a
/// snapshot, not a history. History lives only in the append-only logs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IterationRecord {
    pub iteration: u32,
    pub issue: u64,
    pub status: IterationStatus,
    pub timestamp: DateTime<Utc>,
}

impl IterationRecord {
    pub fn now(iteration: u32, issue: u64, status: IterationStatus) -> Self {
        Self {
            iteration,
            issue,
            status,
            timestamp: Utc::now(),
        }
    }
}

/// Load the latest record; `None` when no iteration has completed yet.
pub fn load_record(path: &Path) -> Result<Option<IterationRecord>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read record {}", path.display()))?;
    let record: IterationRecord = serde_json::from_str(&contents)
        .with_context(|| format!("parse record {}", path.display()))?;
    debug!(iteration = record.iteration, status = record.status.as_str(), "record loaded");
    Ok(Some(record))
}

/// Atomically write the latest record (temp file + rename).
pub fn write_record(path: &Path, record: &IterationRecord) -> Result<()> {
    debug!(
        path = %path.display(),
        iteration = record.iteration,
        issue = record.issue,
        status = record.status.as_str(),
        "writing record"
    );
    let mut buf = serde_json::to_string_pretty(record)?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("record path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp record {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace record {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("last_iteration.json");

        let record = IterationRecord::now(4, 12, IterationStatus::PendingMerge);
        write_record(&path, &record).expect("write");
        let loaded = load_record(&path).expect("load").expect("present");
        assert_eq!(loaded, record);
    }

    #[test]
    fn missing_record_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let loaded = load_record(&temp.path().join("absent.json")).expect("load");
        assert!(loaded.is_none());
    }

    #[test]
    fn serialized_record_uses_stable_status_tags() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("last_iteration.json");
        write_record(&path, &IterationRecord::now(1, 7, IterationStatus::ClaudeFailed))
            .expect("write");
        let contents = fs::read_to_string(&path).expect("read");
        assert!(contents.contains("\"claude_failed\""));
    }
}
