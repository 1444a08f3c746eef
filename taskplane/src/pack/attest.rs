//! Attestation — nonce-bound proof the worker read the served bytes
//!
//! For each bundled file the control plane computes
//! `sha256(nonce || file_bytes)`. A worker proves it used the exact served
//! content by recomputing the same hashes and submitting them back. Any
//! mismatch — a tampered file, a stale cache, a missing entry — fails
//! closed: the submission is rejected, never silently accepted.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::builder::{hex_digest, ContextPack, PackError, PackResult};

/// Nonce-bound hashes over a pack's exact file contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attestation {
    pub context_pack_id: String,
    /// Single-use nonce the hashes are bound to
    pub nonce: String,
    /// path -> sha256(nonce || file_bytes), hex-encoded
    pub per_file_sha256: BTreeMap<String, String>,
}

impl Attestation {
    /// Compute the attestation for a pack from the repository root.
    ///
    /// Each file's plain digest is re-checked against the pack manifest
    /// first; content drift since the pack was built fails the build
    /// rather than attesting bytes the pack never described.
    pub fn build(root: &Path, pack: &ContextPack, nonce: &str) -> PackResult<Self> {
        let mut per_file_sha256 = BTreeMap::new();
        for file in &pack.files {
            let full = root.join(&file.path);
            let bytes = std::fs::read(&full).map_err(|source| PackError::Io {
                path: full.clone(),
                source,
            })?;
            if hex_digest(&bytes) != file.sha256 {
                return Err(PackError::ContentDrift {
                    path: file.path.clone(),
                });
            }
            per_file_sha256.insert(file.path.clone(), nonce_digest(nonce, &bytes));
        }
        Ok(Self {
            context_pack_id: pack.id.clone(),
            nonce: nonce.to_string(),
            per_file_sha256,
        })
    }
}

/// `sha256(nonce || file_bytes)`, hex-encoded
pub fn nonce_digest(nonce: &str, bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nonce.as_bytes());
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Check a worker's reported hashes against the expected attestation.
///
/// Every attested file must be present with an identical hash; the first
/// divergence is returned. Extra reported paths are ignored (the scope
/// check catches writes outside the pack separately).
pub fn verify_attestation(
    expected: &Attestation,
    reported: &BTreeMap<String, String>,
) -> Result<(), String> {
    for (path, hash) in &expected.per_file_sha256 {
        match reported.get(path) {
            None => return Err(format!("missing attested hash for {}", path)),
            Some(reported_hash) if reported_hash != hash => {
                return Err(format!("attested hash mismatch for {}", path));
            }
            Some(_) => {}
        }
    }
    Ok(())
}
