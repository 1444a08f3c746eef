//! Durable job snapshot for crash recovery
//!
//! The queue periodically writes its full job list to a JSON file. On
//! startup the snapshot is loaded and handed to `JobQueue::restore`, which
//! reverts claimed/running jobs to queued before any claim is served.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::job::Job;

/// Error type for snapshot persistence
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("I/O error on job snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid job snapshot {path}: {message}")]
    Invalid { path: PathBuf, message: String },
}

/// Snapshot file layout
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    jobs: Vec<Job>,
}

/// Write all jobs to `path`, replacing any previous snapshot.
///
/// Writes to a sibling temp file first so a crash mid-write cannot corrupt
/// the last good snapshot.
pub fn save_jobs(path: &Path, jobs: &[Job]) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    }

    let file = SnapshotFile {
        jobs: jobs.to_vec(),
    };
    let json = serde_json::to_string_pretty(&file).map_err(|e| SnapshotError::Invalid {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|source| SnapshotError::Io {
        path: tmp.clone(),
        source,
    })?;
    std::fs::rename(&tmp, path).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load jobs from `path`; a missing file is an empty snapshot
pub fn load_jobs(path: &Path) -> Result<Vec<Job>, SnapshotError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let json = std::fs::read_to_string(path).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: SnapshotFile = serde_json::from_str(&json).map_err(|e| SnapshotError::Invalid {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(file.jobs)
}
