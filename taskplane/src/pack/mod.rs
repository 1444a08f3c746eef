//! Context packs — immutable, hashed file bundles bound to one job
//!
//! A pack is exactly the set of files a worker is permitted to see,
//! resolved from the task's pins under a per-task-type byte budget. Packs
//! are write-once; attestation binds a pack to a job through a single-use
//! nonce so the worker can prove it read the exact bytes served.

pub mod attest;
pub mod builder;

pub use attest::{verify_attestation, Attestation};
pub use builder::{ContextPack, ContextPackBuilder, PackError, PackResult, PackStore, PackedFile};
