//! The job queue: enqueue, claim CAS, complete, cancel, lease reaping

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::breach::BreachCode;
use crate::breaker::{CircuitBreakerStore, DispatchGate};
use crate::events::{OrchestrationEvent, SharedEventBus};
use crate::store::MemStore;

use super::job::{Job, JobStatus, RunnerKind};
use super::worker::{WorkerInfo, WorkerRegistry};

/// Error type for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Worker not found: {0}")]
    WorkerUnknown(String),

    #[error("DUPLICATE_DISPATCH: task {task_id} already has job {job_id} in {status}")]
    DuplicateDispatch {
        task_id: String,
        job_id: String,
        status: JobStatus,
    },

    #[error("POLICY_VIOLATION: worker {worker_id} does not hold the claim on job {job_id}")]
    PolicyViolation { job_id: String, worker_id: String },

    #[error("Job {job_id} is {status}; operation requires {expected}")]
    InvalidStatus {
        job_id: String,
        status: JobStatus,
        expected: &'static str,
    },
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue tuning knobs
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a claim holds the job before the lease reaper intervenes
    pub lease: Duration,
    /// Lease-expiry requeues before the job is failed as a poison job
    pub max_requeues: u32,
    /// Default long-poll wait when the client does not specify one
    pub default_wait: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(300),
            max_requeues: 3,
            default_wait: Duration::from_secs(25),
        }
    }
}

/// Outcome of a settled completion write (see `complete`)
#[derive(Debug, Clone, PartialEq, Eq)]
enum CompleteOutcome {
    Applied,
    /// Terminal state already landed; this write is a logged no-op
    Ignored,
}

/// The dispatch queue shared by producers, workers, and the reaper
pub struct JobQueue {
    jobs: MemStore<Job>,
    workers: WorkerRegistry,
    breaker: Arc<CircuitBreakerStore>,
    config: QueueConfig,
    /// Wakes long-poll claimers when a job becomes claimable
    claimable: Notify,
    bus: SharedEventBus,
}

impl JobQueue {
    pub fn new(config: QueueConfig, breaker: Arc<CircuitBreakerStore>, bus: SharedEventBus) -> Self {
        Self {
            jobs: MemStore::new(),
            workers: WorkerRegistry::new(),
            breaker,
            config,
            claimable: Notify::new(),
            bus,
        }
    }

    pub fn workers(&self) -> &WorkerRegistry {
        &self.workers
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Register a worker and return its identity
    pub fn register_worker(
        &self,
        name: impl Into<String>,
        executors: Vec<String>,
        models: Vec<String>,
    ) -> WorkerInfo {
        let worker = self.workers.register(name, executors, models);
        self.bus.publish(OrchestrationEvent::WorkerRegistered {
            worker_id: worker.id.clone(),
            name: worker.name.clone(),
            executors: worker.executors.clone(),
            timestamp: Utc::now(),
        });
        worker
    }

    /// Admit a job for dispatch.
    ///
    /// A task may have at most one non-terminal job; a second enqueue is a
    /// `DUPLICATE_DISPATCH` no-op that leaves the queue untouched.
    pub fn enqueue(&self, job: Job) -> QueueResult<Job> {
        if let Some(existing) = self.job_for_task(&job.task_id) {
            if !existing.status.is_terminal() {
                return Err(QueueError::DuplicateDispatch {
                    task_id: job.task_id,
                    job_id: existing.id,
                    status: existing.status,
                });
            }
        }

        self.jobs.insert(&job.id, job.clone());
        self.bus.publish(OrchestrationEvent::JobQueued {
            job_id: job.id.clone(),
            task_id: job.task_id.clone(),
            executor: job.executor.clone(),
            timestamp: Utc::now(),
        });
        self.claimable.notify_waiters();
        Ok(job)
    }

    /// Long-poll claim for external workers: block up to `wait` for a
    /// matching queued job.
    ///
    /// Holds no lock while waiting; the CAS happens per-job under the
    /// store's key lock, so N concurrent claimers on one job yield exactly
    /// one winner.
    pub async fn claim(
        &self,
        worker_id: &str,
        executor: &str,
        wait: Duration,
    ) -> QueueResult<Option<Job>> {
        self.claim_kind(worker_id, executor, RunnerKind::External, wait)
            .await
    }

    /// Claim restricted to one runner kind; the internal pool uses this so
    /// it never takes jobs meant for external workers (and vice versa).
    pub async fn claim_kind(
        &self,
        worker_id: &str,
        executor: &str,
        runner: RunnerKind,
        wait: Duration,
    ) -> QueueResult<Option<Job>> {
        let worker = self
            .workers
            .get(worker_id)
            .ok_or_else(|| QueueError::WorkerUnknown(worker_id.to_string()))?;
        self.workers.touch(worker_id);

        let deadline = Instant::now() + wait;
        loop {
            // Register for wakeups before scanning so an enqueue between
            // scan and await cannot be missed.
            let notified = self.claimable.notified();

            if let Some(job) = self.try_claim(&worker, executor, runner) {
                return Ok(Some(job));
            }
            if wait.is_zero() {
                return Ok(None);
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    /// One claim pass over the queued jobs, oldest first
    fn try_claim(&self, worker: &WorkerInfo, executor: &str, runner: RunnerKind) -> Option<Job> {
        let mut candidates: Vec<Job> = self
            .jobs
            .list()
            .into_iter()
            .filter(|j| {
                j.status == JobStatus::Queued
                    && j.executor == executor
                    && j.runner == runner
                    && worker.accepts(&j.executor, &j.model)
            })
            .collect();
        candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        for candidate in candidates {
            // External pools are gated by breaker health; internal jobs
            // bypass the breaker (bounded by the runner pool instead).
            let probe = match candidate.runner {
                RunnerKind::Internal => false,
                RunnerKind::External => match self.breaker.gate(&candidate.executor) {
                    DispatchGate::Allow => false,
                    DispatchGate::Probe => true,
                    DispatchGate::Deny => continue,
                },
            };

            let lease = chrono::Duration::from_std(self.config.lease)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));

            // The CAS: only one claimer sees Queued inside the lock.
            let claimed = self.jobs.update(&candidate.id, |job| {
                if job.status != JobStatus::Queued {
                    return None;
                }
                job.status = JobStatus::Claimed;
                job.worker_id = Some(worker.id.clone());
                job.lease_deadline = Some(Utc::now() + lease);
                job.probe = probe;
                Some(job.clone())
            });

            match claimed {
                Some(Some(job)) => {
                    self.bus.publish(OrchestrationEvent::JobClaimed {
                        job_id: job.id.clone(),
                        worker_id: worker.id.clone(),
                        probe,
                        timestamp: Utc::now(),
                    });
                    if probe {
                        self.bus.publish(OrchestrationEvent::BreakerProbe {
                            executor: job.executor.clone(),
                            timestamp: Utc::now(),
                        });
                    }
                    info!(job_id = %job.id, worker_id = %worker.id, probe, "Job claimed");
                    return Some(job);
                }
                _ => {
                    // Lost the race; release a probe slot we reserved.
                    if probe {
                        self.breaker.release_probe(&candidate.executor);
                    }
                }
            }
        }
        None
    }

    /// Mark a claimed job as running (worker began execution)
    pub fn start(&self, job_id: &str, worker_id: &str) -> QueueResult<Job> {
        self.jobs
            .update(job_id, |job| {
                if job.worker_id.as_deref() != Some(worker_id) {
                    return Err(QueueError::PolicyViolation {
                        job_id: job_id.to_string(),
                        worker_id: worker_id.to_string(),
                    });
                }
                if job.status != JobStatus::Claimed {
                    return Err(QueueError::InvalidStatus {
                        job_id: job_id.to_string(),
                        status: job.status,
                        expected: "claimed",
                    });
                }
                job.status = JobStatus::Running;
                job.started_at = Some(Utc::now());
                Ok(job.clone())
            })
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?
    }

    /// Post a completion. Only the claim holder may complete; a repeat of
    /// an identical completion is idempotent; a completion racing a landed
    /// cancel is a logged no-op (the cancel won).
    pub fn complete(&self, job_id: &str, worker_id: &str, exit_code: i32) -> QueueResult<Job> {
        let result = self
            .jobs
            .update(job_id, |job| {
                if job.status.is_terminal() {
                    // Idempotent repeat of the same completion is fine;
                    // anything else lost the race and must not overwrite.
                    return Ok((CompleteOutcome::Ignored, job.clone()));
                }
                if !job.status.is_active() {
                    return Err(QueueError::InvalidStatus {
                        job_id: job_id.to_string(),
                        status: job.status,
                        expected: "claimed or running",
                    });
                }
                if job.worker_id.as_deref() != Some(worker_id) {
                    return Err(QueueError::PolicyViolation {
                        job_id: job_id.to_string(),
                        worker_id: worker_id.to_string(),
                    });
                }
                job.status = if exit_code == 0 {
                    JobStatus::Done
                } else {
                    JobStatus::Failed
                };
                job.exit_code = Some(exit_code);
                job.finished_at = Some(Utc::now());
                job.lease_deadline = None;
                Ok((CompleteOutcome::Applied, job.clone()))
            })
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))??;

        let (outcome, job) = result;
        match outcome {
            CompleteOutcome::Applied => {
                self.bus.publish(OrchestrationEvent::JobCompleted {
                    job_id: job.id.clone(),
                    worker_id: worker_id.to_string(),
                    exit_code,
                    timestamp: Utc::now(),
                });
                info!(job_id = %job.id, exit_code, "Job completed");
            }
            CompleteOutcome::Ignored => {
                self.bus.publish(OrchestrationEvent::JobWriteIgnored {
                    job_id: job.id.clone(),
                    attempted: "complete".to_string(),
                    timestamp: Utc::now(),
                });
                warn!(job_id = %job.id, status = %job.status, "Completion ignored; job already settled");
            }
        }
        Ok(job)
    }

    /// Operator cancel. Honored for queued and claimed-but-not-running
    /// jobs; once a completion has landed the cancel is a logged no-op.
    pub fn cancel(&self, job_id: &str, reason: &str) -> QueueResult<Job> {
        let result = self
            .jobs
            .update(job_id, |job| {
                if job.status.is_terminal() {
                    return Ok((CompleteOutcome::Ignored, job.clone()));
                }
                if job.status == JobStatus::Running {
                    return Err(QueueError::InvalidStatus {
                        job_id: job_id.to_string(),
                        status: job.status,
                        expected: "queued or claimed",
                    });
                }
                job.status = JobStatus::Canceled;
                job.reason_code = Some(reason.to_string());
                job.finished_at = Some(Utc::now());
                job.lease_deadline = None;
                Ok((CompleteOutcome::Applied, job.clone()))
            })
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))??;

        let (outcome, job) = result;
        match outcome {
            CompleteOutcome::Applied => self.bus.publish(OrchestrationEvent::JobCanceled {
                job_id: job.id.clone(),
                reason: reason.to_string(),
                timestamp: Utc::now(),
            }),
            CompleteOutcome::Ignored => self.bus.publish(OrchestrationEvent::JobWriteIgnored {
                job_id: job.id.clone(),
                attempted: "cancel".to_string(),
                timestamp: Utc::now(),
            }),
        }
        Ok(job)
    }

    /// Operator requeue of a settled job
    pub fn requeue(&self, job_id: &str) -> QueueResult<Job> {
        let job = self
            .jobs
            .update(job_id, |job| {
                if !matches!(job.status, JobStatus::Failed | JobStatus::Canceled) {
                    return Err(QueueError::InvalidStatus {
                        job_id: job_id.to_string(),
                        status: job.status,
                        expected: "failed or canceled",
                    });
                }
                job.status = JobStatus::Queued;
                job.worker_id = None;
                job.lease_deadline = None;
                job.exit_code = None;
                job.finished_at = None;
                job.reason_code = Some("requeued_by_operator".to_string());
                Ok(job.clone())
            })
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))??;

        self.bus.publish(OrchestrationEvent::JobRequeued {
            job_id: job.id.clone(),
            requeue_count: job.requeue_count,
            reason: "requeued_by_operator".to_string(),
            timestamp: Utc::now(),
        });
        self.claimable.notify_waiters();
        Ok(job)
    }

    /// Bounded automatic retry after an executor-level failure.
    ///
    /// Returns the requeued job, or None when the requeue cap is hit and
    /// the failure must escalate instead.
    pub fn retry_after_error(&self, job_id: &str) -> QueueResult<Option<Job>> {
        let result = self
            .jobs
            .update(job_id, |job| {
                if job.status != JobStatus::Failed {
                    return Err(QueueError::InvalidStatus {
                        job_id: job_id.to_string(),
                        status: job.status,
                        expected: "failed",
                    });
                }
                if job.requeue_count >= self.config.max_requeues {
                    return Ok(None);
                }
                job.status = JobStatus::Queued;
                job.requeue_count += 1;
                job.worker_id = None;
                job.lease_deadline = None;
                job.exit_code = None;
                job.finished_at = None;
                job.probe = false;
                job.reason_code = Some("retried_after_executor_error".to_string());
                Ok(Some(job.clone()))
            })
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))??;

        if let Some(job) = &result {
            self.bus.publish(OrchestrationEvent::JobRequeued {
                job_id: job.id.clone(),
                requeue_count: job.requeue_count,
                reason: "retried_after_executor_error".to_string(),
                timestamp: Utc::now(),
            });
            self.claimable.notify_waiters();
        }
        Ok(result)
    }

    /// Reset jobs whose lease expired. Bounded by `max_requeues`; past the
    /// bound the job fails with `TIMEOUT_EXCEEDED` so a poison job cannot
    /// loop forever. Returns every job the sweep changed.
    pub fn reap_expired(&self) -> Vec<Job> {
        let now = Utc::now();
        let expired: Vec<String> = self
            .jobs
            .list()
            .into_iter()
            .filter(|j| j.lease_expired(now))
            .map(|j| j.id)
            .collect();

        let mut changed = Vec::new();
        for job_id in expired {
            let updated = self.jobs.update(&job_id, |job| {
                // Re-check under the lock: a completion may have landed.
                if !job.lease_expired(Utc::now()) {
                    return None;
                }
                if job.requeue_count < self.config.max_requeues {
                    job.status = JobStatus::Queued;
                    job.requeue_count += 1;
                    job.worker_id = None;
                    job.lease_deadline = None;
                    job.probe = false;
                    job.reason_code = Some("requeued_after_timeout".to_string());
                } else {
                    job.status = JobStatus::Failed;
                    job.finished_at = Some(Utc::now());
                    job.lease_deadline = None;
                    job.reason_code = Some(BreachCode::TimeoutExceeded.to_string());
                }
                Some(job.clone())
            });

            if let Some(Some(job)) = updated {
                match job.status {
                    JobStatus::Queued => {
                        self.bus.publish(OrchestrationEvent::JobRequeued {
                            job_id: job.id.clone(),
                            requeue_count: job.requeue_count,
                            reason: "requeued_after_timeout".to_string(),
                            timestamp: Utc::now(),
                        });
                        self.claimable.notify_waiters();
                    }
                    JobStatus::Failed => {
                        warn!(job_id = %job.id, "Poison job failed after {} requeues", job.requeue_count);
                    }
                    _ => {}
                }
                changed.push(job);
            }
        }
        changed
    }

    /// Most recent job for a task, if any
    pub fn job_for_task(&self, task_id: &str) -> Option<Job> {
        self.jobs
            .list()
            .into_iter()
            .filter(|j| j.task_id == task_id)
            .max_by(|a, b| a.created_at.cmp(&b.created_at))
    }

    /// The task's claimed/running job, if one exists
    pub fn active_job_for_task(&self, task_id: &str) -> Option<Job> {
        self.jobs
            .list()
            .into_iter()
            .find(|j| j.task_id == task_id && j.status.is_active())
    }

    pub fn get(&self, job_id: &str) -> QueueResult<Job> {
        self.jobs
            .get(job_id)
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))
    }

    pub fn list(&self) -> Vec<Job> {
        self.jobs.list()
    }

    /// Snapshot every job for durable persistence
    pub fn snapshot_jobs(&self) -> Vec<Job> {
        self.jobs.list()
    }

    /// Restore jobs from a snapshot, reverting in-flight claims.
    ///
    /// Must run before any claim is served: a worker whose claim predates
    /// the crash no longer holds a lease.
    pub fn restore(&self, jobs: Vec<Job>) {
        for mut job in jobs {
            if job.status.is_active() {
                job.status = JobStatus::Queued;
                job.worker_id = None;
                job.lease_deadline = None;
                job.probe = false;
                job.reason_code = Some("requeued_after_restart".to_string());
            }
            self.jobs.put(&job.id.clone(), job);
        }
    }
}
