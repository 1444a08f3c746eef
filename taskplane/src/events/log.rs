//! Append-only JSONL event log
//!
//! One JSON line per state transition, append-only. The file is the audit
//! record of the control plane; nothing in the system rewrites it.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::types::OrchestrationEvent;

/// Error type for event log operations
#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("I/O error on event log {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Durable append-only JSONL sink for orchestration events
pub struct JsonlEventLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlEventLog {
    /// Open (creating if needed) the log at `path` for appending
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EventLogError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| EventLogError::Io {
                path: path.clone(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| EventLogError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a single JSON line
    pub fn append(&self, event: &OrchestrationEvent) -> Result<(), EventLogError> {
        let line = serde_json::to_string(event)?;
        let mut file = self.file.lock().expect("event log mutex poisoned");
        writeln!(file, "{}", line).map_err(|source| EventLogError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }

    /// Read the last `limit` events from disk (oldest first)
    pub fn read_recent(&self, limit: usize) -> Result<Vec<OrchestrationEvent>, EventLogError> {
        let file = File::open(&self.path).map_err(|source| EventLogError::Io {
            path: self.path.clone(),
            source,
        })?;
        let reader = BufReader::new(file);

        let mut events: Vec<OrchestrationEvent> = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|source| EventLogError::Io {
                path: self.path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            // Tolerate individual corrupt lines; the rest of the log is
            // still usable evidence.
            if let Ok(event) = serde_json::from_str(&line) {
                events.push(event);
            }
        }

        let skip = events.len().saturating_sub(limit);
        Ok(events.into_iter().skip(skip).collect())
    }
}
