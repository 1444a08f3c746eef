//! Escalation Policy Engine — deterministic failure-response ladder
//!
//! Maps (breach code, attempt counters, repeat counters) to one of five
//! increasing-authority responses: retry, model upgrade, role upgrade,
//! human, abort/DLQ. Pure decision logic, no I/O — the orchestrator applies
//! the decided level to the board and queue.

pub mod engine;
pub mod state;

pub use engine::{next_level, BreachCounters, EscalationConfig, EscalationEngine, EscalationLevel};
pub use state::{EscalationStep, EscalationTracker, TaskEscalation};
