//! Activity log: append-only JSONL audit trail.
//!
//! One line per event: `{"timestamp": ..., "type": ..., "data": {...}}`.
//! Writing is best-effort from the caller's point of view: [`EventLog::record`]
//! never returns an error, failures only surface as a tracing warning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Single structured record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    /// Event kind, e.g. "update_detected", "notification_sent"
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl EventRecord {
    pub fn new(kind: &str, data: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: kind.to_string(),
            data,
        }
    }

    /// String field from `data`, if present
    pub fn field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }
}

/// Append-only event log store
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Default location relative to the working directory
    pub fn default_path() -> PathBuf {
        PathBuf::from("logs/activity_log.txt")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record, reporting I/O failures
    pub fn append(&self, record: &EventRecord) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        // Single write so concurrent appenders never interleave within a line
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }

    /// Best-effort append; never fails the caller
    pub fn record(&self, kind: &str, data: serde_json::Value) {
        let record = EventRecord::new(kind, data);
        if let Err(e) = self.append(&record) {
            warn!("Failed to write activity record {}: {}", kind, e);
        }
    }

    /// Read all records, skipping malformed lines
    pub fn read_all(&self) -> std::io::Result<Vec<EventRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(record) = serde_json::from_str::<EventRecord>(&line) {
                records.push(record);
            }
        }

        Ok(records)
    }

    /// All records of one kind, oldest first
    pub fn read_kind(&self, kind: &str) -> Vec<EventRecord> {
        self.read_all()
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.kind == kind)
            .collect()
    }
}
