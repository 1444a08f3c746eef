//! Event types for the orchestration audit trail

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::board::task::{TaskEvent, TaskStatus};
use crate::breach::BreachCode;

/// All control-plane events, one per state transition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    TaskCreated {
        task_id: String,
        kind: String,
        lane: String,
        timestamp: DateTime<Utc>,
    },

    TaskSplit {
        parent_id: String,
        child_ids: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    TaskTransitioned {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
        event: TaskEvent,
        timestamp: DateTime<Utc>,
    },

    TaskDeadLettered {
        task_id: String,
        reason: BreachCode,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    JobQueued {
        job_id: String,
        task_id: String,
        executor: String,
        timestamp: DateTime<Utc>,
    },

    JobClaimed {
        job_id: String,
        worker_id: String,
        /// True when this claim is the single health probe of a quarantined pool
        probe: bool,
        timestamp: DateTime<Utc>,
    },

    JobCompleted {
        job_id: String,
        worker_id: String,
        exit_code: i32,
        timestamp: DateTime<Utc>,
    },

    /// A lease expired and the job went back to queued
    JobRequeued {
        job_id: String,
        requeue_count: u32,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    JobCanceled {
        job_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A cancel or completion raced a settled job; nothing was mutated
    JobWriteIgnored {
        job_id: String,
        attempted: String,
        timestamp: DateTime<Utc>,
    },

    WorkerRegistered {
        worker_id: String,
        name: String,
        executors: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    PackBuilt {
        pack_id: String,
        file_count: usize,
        bytes: u64,
        truncated: usize,
        timestamp: DateTime<Utc>,
    },

    AttestationFailed {
        job_id: String,
        pack_id: String,
        path: String,
        timestamp: DateTime<Utc>,
    },

    BreakerOpened {
        executor: String,
        consecutive_failures: u32,
        quarantine_until_ms: i64,
        timestamp: DateTime<Utc>,
    },

    BreakerClosed {
        executor: String,
        timestamp: DateTime<Utc>,
    },

    BreakerProbe {
        executor: String,
        timestamp: DateTime<Utc>,
    },

    /// Breaker stayed open past its maximum duration; humans notified
    BreakerStuckOpen {
        executor: String,
        open_for_ms: i64,
        timestamp: DateTime<Utc>,
    },

    VerdictIssued {
        task_id: String,
        job_id: String,
        verdict: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    EscalationDecided {
        task_id: String,
        breach: BreachCode,
        level: u8,
        action: String,
        timestamp: DateTime<Utc>,
    },
}

impl OrchestrationEvent {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::TaskCreated { timestamp, .. }
            | Self::TaskSplit { timestamp, .. }
            | Self::TaskTransitioned { timestamp, .. }
            | Self::TaskDeadLettered { timestamp, .. }
            | Self::JobQueued { timestamp, .. }
            | Self::JobClaimed { timestamp, .. }
            | Self::JobCompleted { timestamp, .. }
            | Self::JobRequeued { timestamp, .. }
            | Self::JobCanceled { timestamp, .. }
            | Self::JobWriteIgnored { timestamp, .. }
            | Self::WorkerRegistered { timestamp, .. }
            | Self::PackBuilt { timestamp, .. }
            | Self::AttestationFailed { timestamp, .. }
            | Self::BreakerOpened { timestamp, .. }
            | Self::BreakerClosed { timestamp, .. }
            | Self::BreakerProbe { timestamp, .. }
            | Self::BreakerStuckOpen { timestamp, .. }
            | Self::VerdictIssued { timestamp, .. }
            | Self::EscalationDecided { timestamp, .. } => *timestamp,
        }
    }

    /// Short event type tag, matching the wire `type` field
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "task_created",
            Self::TaskSplit { .. } => "task_split",
            Self::TaskTransitioned { .. } => "task_transitioned",
            Self::TaskDeadLettered { .. } => "task_dead_lettered",
            Self::JobQueued { .. } => "job_queued",
            Self::JobClaimed { .. } => "job_claimed",
            Self::JobCompleted { .. } => "job_completed",
            Self::JobRequeued { .. } => "job_requeued",
            Self::JobCanceled { .. } => "job_canceled",
            Self::JobWriteIgnored { .. } => "job_write_ignored",
            Self::WorkerRegistered { .. } => "worker_registered",
            Self::PackBuilt { .. } => "pack_built",
            Self::AttestationFailed { .. } => "attestation_failed",
            Self::BreakerOpened { .. } => "breaker_opened",
            Self::BreakerClosed { .. } => "breaker_closed",
            Self::BreakerProbe { .. } => "breaker_probe",
            Self::BreakerStuckOpen { .. } => "breaker_stuck_open",
            Self::VerdictIssued { .. } => "verdict_issued",
            Self::EscalationDecided { .. } => "escalation_decided",
        }
    }

    /// Task id carried by this event, if any
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskCreated { task_id, .. }
            | Self::TaskTransitioned { task_id, .. }
            | Self::TaskDeadLettered { task_id, .. }
            | Self::JobQueued { task_id, .. }
            | Self::VerdictIssued { task_id, .. }
            | Self::EscalationDecided { task_id, .. } => Some(task_id),
            Self::TaskSplit { parent_id, .. } => Some(parent_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_wire_format() {
        let event = OrchestrationEvent::JobClaimed {
            job_id: "job-1".to_string(),
            worker_id: "worker-1".to_string(),
            probe: false,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"job_claimed\""));

        let back: OrchestrationEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type(), "job_claimed");
    }

    #[test]
    fn test_task_id_accessor() {
        let event = OrchestrationEvent::TaskCreated {
            task_id: "task-1".to_string(),
            kind: "atomic".to_string(),
            lane: "default".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.task_id(), Some("task-1"));

        let event = OrchestrationEvent::BreakerClosed {
            executor: "claude-cli".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.task_id(), None);
    }
}
