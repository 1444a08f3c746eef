//! Context Pack Builder — byte-budgeted, deterministic bundle assembly

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::board::task::{Pins, TaskType};
use crate::store::MemStore;

/// Error type for pack operations
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Pack not found: {0}")]
    NotFound(String),

    #[error("Pack {0} already registered; packs are write-once")]
    Duplicate(String),

    #[error("Pin '{0}' resolves outside the repository root")]
    PathEscapesRoot(String),

    #[error("Pins resolved to no readable files")]
    EmptyPack,

    #[error("File {path} changed since the pack was built")]
    ContentDrift { path: String },
}

/// Result type for pack operations
pub type PackResult<T> = Result<T, PackError>;

/// One bundled file with its content digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedFile {
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// An immutable, hashed bundle of the files one job may read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPack {
    pub id: String,
    pub files: Vec<PackedFile>,
    /// Digest over the sorted path/hash manifest
    pub manifest_sha256: String,
    /// The byte budget that was applied, for audit
    pub budget_applied: u64,
    /// Files dropped by deterministic truncation, lowest priority first
    pub truncated: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ContextPack {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.bytes).sum()
    }

    pub fn file(&self, path: &str) -> Option<&PackedFile> {
        self.files.iter().find(|f| f.path == path)
    }
}

/// Byte budget for a task type (env-overridable)
fn byte_budget(task_type: TaskType) -> u64 {
    fn from_env(var: &str, default: u64) -> u64 {
        std::env::var(var)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(default)
    }

    match task_type {
        TaskType::Doc => from_env("TASKPLANE_PACK_BUDGET_DOC", 64 * 1024),
        TaskType::Fix => from_env("TASKPLANE_PACK_BUDGET_FIX", 256 * 1024),
        TaskType::Feature => from_env("TASKPLANE_PACK_BUDGET_FEATURE", 512 * 1024),
        TaskType::Refactor => from_env("TASKPLANE_PACK_BUDGET_REFACTOR", 1024 * 1024),
    }
}

/// Builds packs from a repository root
pub struct ContextPackBuilder {
    root: PathBuf,
}

impl ContextPackBuilder {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve pins to a pack under the task type's byte budget.
    ///
    /// Priority is explicit pin order, then path sort within a directory
    /// pin. Files past the budget are dropped deterministically and
    /// recorded in `truncated` rather than failing the build.
    pub fn build(&self, pins: &Pins, task_type: TaskType) -> PackResult<ContextPack> {
        let budget = byte_budget(task_type);
        let candidates = self.resolve_pins(pins)?;
        if candidates.is_empty() {
            return Err(PackError::EmptyPack);
        }

        let mut files = Vec::new();
        let mut truncated = Vec::new();
        let mut used: u64 = 0;

        for rel in candidates {
            let full = self.root.join(&rel);
            let bytes = std::fs::read(&full).map_err(|source| PackError::Io {
                path: full.clone(),
                source,
            })?;
            let size = bytes.len() as u64;

            if used + size > budget {
                truncated.push(rel);
                continue;
            }
            used += size;
            files.push(PackedFile {
                path: rel,
                sha256: hex_digest(&bytes),
                bytes: size,
            });
        }

        if files.is_empty() {
            // Budget smaller than the single highest-priority file: an
            // empty pack is useless, surface it instead.
            return Err(PackError::EmptyPack);
        }

        let manifest_sha256 = manifest_digest(&files);
        let pack = ContextPack {
            id: uuid::Uuid::new_v4().to_string(),
            files,
            manifest_sha256,
            budget_applied: budget,
            truncated,
            created_at: Utc::now(),
        };
        debug!(
            pack_id = %pack.id,
            files = pack.files.len(),
            bytes = used,
            truncated = pack.truncated.len(),
            "Context pack built"
        );
        Ok(pack)
    }

    /// Expand pins to an ordered, deduplicated list of repo-relative paths
    fn resolve_pins(&self, pins: &Pins) -> PackResult<Vec<String>> {
        let canon_root = self
            .root
            .canonicalize()
            .map_err(|source| PackError::Io {
                path: self.root.clone(),
                source,
            })?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut ordered = Vec::new();

        for pin in &pins.allowed_paths {
            let full = self.root.join(pin);
            let Ok(canonical) = full.canonicalize() else {
                // A pin naming a nonexistent path contributes nothing;
                // the judge still enforces it on the write side.
                continue;
            };
            if !canonical.starts_with(&canon_root) {
                return Err(PackError::PathEscapesRoot(pin.clone()));
            }

            if canonical.is_file() {
                self.push_candidate(&canonical, &canon_root, pins, &mut seen, &mut ordered);
            } else if canonical.is_dir() {
                let mut walked: Vec<PathBuf> = WalkBuilder::new(&canonical)
                    .hidden(true)
                    .git_ignore(true)
                    .build()
                    .flatten()
                    .map(|e| e.into_path())
                    .filter(|p| p.is_file())
                    .collect();
                walked.sort();
                for file in walked {
                    self.push_candidate(&file, &canon_root, pins, &mut seen, &mut ordered);
                }
            }
        }

        Ok(ordered)
    }

    fn push_candidate(
        &self,
        file: &Path,
        canon_root: &Path,
        pins: &Pins,
        seen: &mut HashSet<String>,
        ordered: &mut Vec<String>,
    ) {
        let Ok(rel) = file.strip_prefix(canon_root) else {
            return;
        };
        let rel = rel.to_string_lossy().to_string();
        if !pins.permits(&rel) {
            return;
        }
        if seen.insert(rel.clone()) {
            ordered.push(rel);
        }
    }
}

/// Write-once store for built packs
pub struct PackStore {
    packs: MemStore<ContextPack>,
}

impl PackStore {
    pub fn new() -> Self {
        Self {
            packs: MemStore::new(),
        }
    }

    /// Register a pack; re-registering an id is an error, never an update
    pub fn register(&self, pack: ContextPack) -> PackResult<()> {
        let id = pack.id.clone();
        if self.packs.insert(&id, pack) {
            Ok(())
        } else {
            Err(PackError::Duplicate(id))
        }
    }

    pub fn get(&self, pack_id: &str) -> PackResult<ContextPack> {
        self.packs
            .get(pack_id)
            .ok_or_else(|| PackError::NotFound(pack_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.packs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packs.is_empty()
    }
}

impl Default for PackStore {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn manifest_digest(files: &[PackedFile]) -> String {
    let mut lines: Vec<String> = files
        .iter()
        .map(|f| format!("{} {}", f.path, f.sha256))
        .collect();
    lines.sort();
    hex_digest(lines.join("\n").as_bytes())
}
