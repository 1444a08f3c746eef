//! Per-task escalation state — repeat tracking and the monotonic level

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::breach::BreachCode;
use crate::store::MemStore;

use super::engine::{BreachCounters, EscalationEngine, EscalationLevel};

/// One recorded escalation decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationStep {
    pub breach: BreachCode,
    pub from_level: EscalationLevel,
    pub to_level: EscalationLevel,
    pub repeat_count: u32,
    pub timestamp: DateTime<Utc>,
}

/// Escalation history for a single task lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEscalation {
    pub task_id: String,
    /// High-water level; never decreases without an explicit human event
    pub level: EscalationLevel,
    pub last_breach: Option<BreachCode>,
    /// Consecutive occurrences of `last_breach`
    pub consecutive_repeats: u32,
    pub history: Vec<EscalationStep>,
    /// Set when a human explicitly resolved a Level3 hold
    pub human_resolutions: u32,
}

impl TaskEscalation {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            level: EscalationLevel::Level0,
            last_breach: None,
            consecutive_repeats: 0,
            history: Vec::new(),
            human_resolutions: 0,
        }
    }

    /// Record a breach observation and return the updated repeat count
    fn observe(&mut self, breach: BreachCode) -> u32 {
        if self.last_breach == Some(breach) {
            self.consecutive_repeats += 1;
        } else {
            self.last_breach = Some(breach);
            self.consecutive_repeats = 1;
        }
        self.consecutive_repeats
    }
}

/// Tracker owning the escalation state of every task
pub struct EscalationTracker {
    states: MemStore<TaskEscalation>,
    engine: EscalationEngine,
}

impl EscalationTracker {
    pub fn new(engine: EscalationEngine) -> Self {
        Self {
            states: MemStore::new(),
            engine,
        }
    }

    /// Feed one breach through the engine and record the decision.
    ///
    /// The stored level only moves up; re-entering Level0 requires
    /// `resolve_by_human`.
    pub fn decide(
        &self,
        task_id: &str,
        breach: BreachCode,
        attempt: u32,
        max_attempts: u32,
    ) -> EscalationLevel {
        self.states
            .insert(task_id, TaskEscalation::new(task_id));
        self.states
            .update(task_id, |state| {
                let repeat_count = state.observe(breach);
                let from_level = state.level;
                let to_level = self.engine.decide(
                    from_level,
                    breach,
                    BreachCounters {
                        attempt,
                        max_attempts,
                        repeat_count,
                    },
                );
                state.level = to_level.max(state.level);
                state.history.push(EscalationStep {
                    breach,
                    from_level,
                    to_level: state.level,
                    repeat_count,
                    timestamp: Utc::now(),
                });
                state.level
            })
            .expect("state inserted above")
    }

    /// Explicit human resolution of a Level3 hold: the ladder restarts
    pub fn resolve_by_human(&self, task_id: &str) -> Option<TaskEscalation> {
        self.states.update(task_id, |state| {
            state.level = EscalationLevel::Level0;
            state.last_breach = None;
            state.consecutive_repeats = 0;
            state.human_resolutions += 1;
            state.clone()
        })
    }

    pub fn get(&self, task_id: &str) -> Option<TaskEscalation> {
        self.states.get(task_id)
    }
}
