//! Job record and status machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a job executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerKind {
    /// Executed by the in-process bounded pool
    Internal,
    /// Claimed and executed by an external worker process
    External,
}

/// Job lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Claimed,
    Running,
    Done,
    Failed,
    Canceled,
}

impl JobStatus {
    /// Claimed or running: holds the task's single active slot
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Claimed | Self::Running)
    }

    /// Done, failed, or canceled: no further writes accepted
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Canceled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Claimed => "claimed",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        write!(f, "{}", s)
    }
}

/// One dispatch of a task to an executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub task_id: String,
    pub executor: String,
    pub model: String,
    pub runner: RunnerKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub status: JobStatus,
    pub context_pack_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation_nonce: Option<String>,
    /// Claim lease expiry; None while queued or settled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_deadline: Option<DateTime<Utc>>,
    /// Times this job was reset to queued after a lease expiry
    pub requeue_count: u32,
    /// True when this claim was the single probe of a quarantined pool
    #[serde(default)]
    pub probe: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
}

impl Job {
    pub fn new(
        task_id: impl Into<String>,
        executor: impl Into<String>,
        model: impl Into<String>,
        runner: RunnerKind,
        context_pack_id: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            executor: executor.into(),
            model: model.into(),
            runner,
            worker_id: None,
            status: JobStatus::Queued,
            context_pack_id: context_pack_id.into(),
            attestation_nonce: None,
            lease_deadline: None,
            requeue_count: 0,
            probe: false,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            exit_code: None,
            reason_code: None,
        }
    }

    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.attestation_nonce = Some(nonce.into());
        self
    }

    /// Whether the lease has expired at `now`
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active() && self.lease_deadline.is_some_and(|d| now >= d)
    }
}
