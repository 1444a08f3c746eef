//! Orchestration events — append-only audit trail plus in-process pub/sub
//!
//! Every state transition in the board, queue, breaker, and judge is
//! published as one `OrchestrationEvent`. The bus broadcasts to live
//! subscribers, keeps a bounded in-memory history ring (served by
//! `GET /leader`), and optionally appends one JSON line per event to a
//! durable log file.

pub mod bus;
pub mod log;
pub mod types;

pub use bus::{EventBus, SharedEventBus};
pub use log::JsonlEventLog;
pub use types::OrchestrationEvent;
