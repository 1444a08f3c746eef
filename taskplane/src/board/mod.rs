//! Task Board — authoritative state machine for parent/atomic tasks
//!
//! Owns `Task` and its status field exclusively. Transitions form a strict
//! DAG; illegal transitions fail with `INVALID_TRANSITION` and mutate
//! nothing. WIP limits are enforced per lane at dispatch time.

pub mod board;
pub mod task;

pub use board::{BoardError, BoardResult, BoardSummary, TaskBoard};
pub use task::{Pins, Task, TaskEvent, TaskKind, TaskSpec, TaskStatus, TaskType};
