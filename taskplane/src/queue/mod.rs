//! Job Queue & Worker Claim Protocol
//!
//! Turns ready tasks into dispatchable jobs. Workers long-poll `claim`,
//! execute off-process, and post completion. Claim is the one true
//! compare-and-swap in the system (`queued -> claimed` under the job's
//! store lock); everything else reads snapshots. A claimed job that
//! outlives its lease is reset to queued with a bounded requeue count.

pub mod job;
pub mod queue;
pub mod snapshot;
pub mod worker;

pub use job::{Job, JobStatus, RunnerKind};
pub use queue::{JobQueue, QueueConfig, QueueError, QueueResult};
pub use snapshot::{load_jobs, save_jobs};
pub use worker::{WorkerInfo, WorkerRegistry};
