//! Taskplane — a task-orchestration control plane for code-writing agents
//!
//! This library provides:
//! - A task board: the authoritative state machine for goals decomposed
//!   into parent/atomic tasks, with per-lane WIP limits
//! - A job queue with a worker claim-and-lease protocol (long-poll claim,
//!   at-most-one active job per task, bounded requeue on lease expiry)
//! - Context packs with nonce-bound attestation, so a worker can prove it
//!   read the exact bytes it was served
//! - A per-executor circuit breaker with durable JSON state and a
//!   single-probe recovery protocol
//! - A pure escalation policy engine (retry, model upgrade, role upgrade,
//!   human, abort/DLQ)
//! - A deterministic verdict judge enforcing scope, schema, test, and
//!   artifact contracts fail-closed
//!
//! # Usage
//!
//! ```bash
//! # Serve the control plane over HTTP
//! taskplane --addr 127.0.0.1:7180 --state-dir ./.taskplane
//!
//! # Point it at a repository and a config file
//! taskplane --repo-root ../myrepo --config taskplane.toml
//! ```

pub mod board;
pub mod breach;
pub mod breaker;
pub mod config;
pub mod escalation;
pub mod events;
pub mod orchestrator;
pub mod pack;
pub mod queue;
pub mod runner;
pub mod server;
pub mod store;
pub mod verdict;

// Re-export key board types
pub use board::{BoardError, BoardSummary, Pins, Task, TaskBoard, TaskEvent, TaskKind, TaskSpec, TaskStatus, TaskType};

// Re-export breach taxonomy
pub use breach::{BreachClass, BreachCode};

// Re-export breaker types
pub use breaker::{
    quarantine_active, BreakerConfig, CircuitBreakerState, CircuitBreakerStore, DispatchGate,
};

// Re-export queue types
pub use queue::{Job, JobQueue, JobStatus, QueueConfig, QueueError, RunnerKind, WorkerInfo};

// Re-export pack types
pub use pack::{verify_attestation, Attestation, ContextPack, ContextPackBuilder, PackStore};

// Re-export escalation types
pub use escalation::{
    next_level, BreachCounters, EscalationConfig, EscalationEngine, EscalationLevel,
    EscalationTracker,
};

// Re-export verdict types
pub use verdict::{Judge, NextAction, Submission, SubmissionStatus, Verdict, VerdictDecision};

// Re-export event types
pub use events::{EventBus, JsonlEventLog, OrchestrationEvent, SharedEventBus};

// Re-export orchestration types
pub use orchestrator::{DispatchOutcome, Orchestrator, OrchestratorError, SettleOutcome};

// Re-export configuration
pub use config::Config;
