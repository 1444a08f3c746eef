//! Orchestrator — wires the board, queue, packs, breaker, judge, and
//! escalation ladder into the dispatch and settle paths
//!
//! Dispatch: ready task -> context pack + attestation -> breaker-gated job.
//! Settle: completion -> attestation check -> verdict -> board update, with
//! failures routed through the escalation engine (requeue, model/role
//! widening, human hold, dead-letter).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::board::{BoardError, TaskBoard, TaskEvent, TaskKind, TaskSpec, TaskStatus};
use crate::breach::BreachCode;
use crate::breaker::{BreakerConfig, BreakerError, CircuitBreakerStore};
use crate::config::Config;
use crate::escalation::{EscalationConfig, EscalationEngine, EscalationLevel, EscalationTracker};
use crate::events::{OrchestrationEvent, SharedEventBus};
use crate::pack::{
    verify_attestation, Attestation, ContextPackBuilder, PackError, PackStore,
};
use crate::queue::snapshot::{load_jobs, save_jobs, SnapshotError};
use crate::queue::{Job, JobQueue, JobStatus, QueueConfig, QueueError, RunnerKind};
use crate::store::MemStore;
use crate::verdict::{Judge, Verdict, VerdictDecision};

/// Error type for orchestration operations
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Board(#[from] BoardError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Pack(#[from] PackError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Executor {executor} is not allowed for task {task_id}")]
    ExecutorNotAllowed { task_id: String, executor: String },

    #[error("Startup state error: {0}")]
    State(String),
}

impl From<BreakerError> for OrchestratorError {
    fn from(e: BreakerError) -> Self {
        Self::State(e.to_string())
    }
}

impl From<SnapshotError> for OrchestratorError {
    fn from(e: SnapshotError) -> Self {
        Self::State(e.to_string())
    }
}

/// Result type for orchestration operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Outcome of a dispatch request
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Dispatched { job: Job },
    /// Lane WIP cap reached; the task stays ready. Not an error.
    Deferred { lane: String },
}

/// Outcome of settling a completion
#[derive(Debug, Clone, Serialize)]
pub struct SettleOutcome {
    pub job_id: String,
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    pub task_status: TaskStatus,
    /// True when the write raced an already-settled job and was a no-op
    pub ignored: bool,
}

/// The control plane's component wiring
pub struct Orchestrator {
    config: Config,
    board: TaskBoard,
    queue: JobQueue,
    packs: PackStore,
    pack_builder: ContextPackBuilder,
    breaker: Arc<CircuitBreakerStore>,
    escalation: EscalationTracker,
    judge: Judge,
    /// Expected attestation per job id
    attestations: MemStore<Attestation>,
    /// Last verdict per task, evidence for /debug/failures
    verdicts: MemStore<Verdict>,
    bus: SharedEventBus,
    snapshot_path: Option<PathBuf>,
}

impl Orchestrator {
    /// Build the full wiring, loading durable state.
    ///
    /// Persisted claimed/running jobs revert to queued here, before any
    /// claim can be served.
    pub fn new(config: Config, bus: SharedEventBus) -> OrchestratorResult<Self> {
        let breaker_dir = config.state_dir.as_ref().map(|d| d.join("breakers"));
        let breaker = Arc::new(CircuitBreakerStore::new(
            BreakerConfig {
                failure_threshold: config.breaker.failure_threshold,
                cooldown_ms: (config.breaker.cooldown_secs * 1000) as i64,
                max_cooldown_ms: (config.breaker.max_cooldown_secs * 1000) as i64,
                max_open_ms: (config.breaker.max_open_secs * 1000) as i64,
            },
            breaker_dir,
            Arc::clone(&bus),
        ));
        breaker.load()?;

        let board = TaskBoard::new(
            config.board.wip_limits.clone(),
            config.board.default_wip_limit,
            config.board.known_roles.clone(),
            config.board.default_max_attempts,
            Arc::clone(&bus),
        );

        let queue = JobQueue::new(
            QueueConfig {
                lease: std::time::Duration::from_secs(config.queue.lease_secs),
                max_requeues: config.queue.max_requeues,
                default_wait: std::time::Duration::from_millis(config.queue.default_wait_ms),
            },
            Arc::clone(&breaker),
            Arc::clone(&bus),
        );

        let snapshot_path = config.state_dir.as_ref().map(|d| d.join("jobs.json"));
        if let Some(path) = &snapshot_path {
            let jobs = load_jobs(path)?;
            if !jobs.is_empty() {
                info!(count = jobs.len(), "Restoring job snapshot");
                queue.restore(jobs);
            }
        }

        let repo_root = config
            .repo_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            escalation: EscalationTracker::new(EscalationEngine::with_config(EscalationConfig {
                repeat_threshold: config.escalation.repeat_threshold,
            })),
            board,
            queue,
            packs: PackStore::new(),
            pack_builder: ContextPackBuilder::new(repo_root),
            breaker,
            judge: Judge::new(),
            attestations: MemStore::new(),
            verdicts: MemStore::new(),
            bus,
            snapshot_path,
            config,
        })
    }

    pub fn board(&self) -> &TaskBoard {
        &self.board
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn packs(&self) -> &PackStore {
        &self.packs
    }

    pub fn breaker(&self) -> &CircuitBreakerStore {
        &self.breaker
    }

    pub fn escalation(&self) -> &EscalationTracker {
        &self.escalation
    }

    pub fn bus(&self) -> &SharedEventBus {
        &self.bus
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create a task and, for dispatchable atomics, dispatch it in one step
    pub fn create_and_dispatch(
        &self,
        spec: TaskSpec,
        executor: Option<&str>,
        model: Option<&str>,
        runner: RunnerKind,
    ) -> OrchestratorResult<(TaskStatus, String, Option<DispatchOutcome>)> {
        let task = self.board.create_task(spec)?;
        if task.kind == TaskKind::Parent {
            return Ok((task.status, task.id, None));
        }
        let outcome = self.dispatch(&task.id, executor, model, runner)?;
        let task = self.board.get(&task.id)?;
        Ok((task.status, task.id, Some(outcome)))
    }

    /// Dispatch a ready (or dispatchable backlog) task: build the pack,
    /// attest it, enqueue the job, and move the task in progress.
    pub fn dispatch(
        &self,
        task_id: &str,
        executor: Option<&str>,
        model: Option<&str>,
        runner: RunnerKind,
    ) -> OrchestratorResult<DispatchOutcome> {
        let mut task = self.board.get(task_id)?;
        if task.status == TaskStatus::Backlog {
            task = self.board.transition(task_id, TaskEvent::Readied)?;
        }
        if task.status != TaskStatus::Ready {
            return Err(OrchestratorError::Validation(format!(
                "task {} is {}, not ready",
                task_id, task.status
            )));
        }

        // Scheduling deferral, not an error
        if !self.board.has_capacity(&task.lane) {
            return Ok(DispatchOutcome::Deferred {
                lane: task.lane.clone(),
            });
        }

        let executor = match executor {
            Some(e) => e.to_string(),
            None => task
                .allowed_executors
                .first()
                .cloned()
                .unwrap_or_else(|| self.config.runner.default_executor.clone()),
        };
        if !task.allowed_executors.is_empty() && !task.allowed_executors.contains(&executor) {
            return Err(OrchestratorError::ExecutorNotAllowed {
                task_id: task_id.to_string(),
                executor,
            });
        }

        let model = match model {
            Some(m) => m.to_string(),
            None => task
                .allowed_models
                .first()
                .cloned()
                .or_else(|| self.config.ladders.models.first().cloned())
                .unwrap_or_else(|| "default".to_string()),
        };

        // Cheap pre-check; enqueue re-checks under the lock
        if let Some(existing) = self.queue.job_for_task(task_id) {
            if !existing.status.is_terminal() {
                return Err(QueueError::DuplicateDispatch {
                    task_id: task_id.to_string(),
                    job_id: existing.id,
                    status: existing.status,
                }
                .into());
            }
        }

        let pack = self.pack_builder.build(&task.pins, task.task_type)?;
        self.packs.register(pack.clone())?;
        self.bus.publish(OrchestrationEvent::PackBuilt {
            pack_id: pack.id.clone(),
            file_count: pack.files.len(),
            bytes: pack.total_bytes(),
            truncated: pack.truncated.len(),
            timestamp: Utc::now(),
        });

        let nonce = uuid::Uuid::new_v4().to_string();
        let attestation = Attestation::build(self.pack_builder.root(), &pack, &nonce)?;
        let job = Job::new(task_id, &executor, &model, runner, &pack.id).with_nonce(&nonce);
        self.attestations.put(&job.id, attestation);

        let job = self.queue.enqueue(job)?;
        self.board.set_last_job(task_id, &job.id)?;
        self.board.transition(task_id, TaskEvent::Dispatched)?;
        info!(task_id, job_id = %job.id, executor = %executor, model = %model, "Task dispatched");
        Ok(DispatchOutcome::Dispatched { job })
    }

    /// Settle a worker completion: verify, judge, and apply the verdict.
    pub fn settle(
        &self,
        job_id: &str,
        worker_id: &str,
        exit_code: i32,
        submission: Option<&serde_json::Value>,
        attested_hashes: Option<&BTreeMap<String, String>>,
    ) -> OrchestratorResult<SettleOutcome> {
        // A repeat of an already-settled job must not re-apply the verdict.
        let before = self.queue.get(job_id)?;
        if before.status.is_terminal() {
            let _ = self.queue.complete(job_id, worker_id, exit_code)?;
            return Ok(SettleOutcome {
                job_id: job_id.to_string(),
                task_id: before.task_id.clone(),
                verdict: None,
                task_status: self.board.get(&before.task_id)?.status,
                ignored: true,
            });
        }

        let job = self.queue.complete(job_id, worker_id, exit_code)?;
        if job.status == JobStatus::Canceled {
            // Cancel landed first; the completion is a logged no-op.
            return Ok(SettleOutcome {
                job_id: job_id.to_string(),
                task_id: job.task_id.clone(),
                verdict: None,
                task_status: self.board.get(&job.task_id)?.status,
                ignored: true,
            });
        }

        // Breaker health tracks executor infrastructure
        if job.runner == RunnerKind::External {
            if exit_code == 0 {
                self.breaker.record_success(&job.executor);
            } else {
                self.breaker.record_failure(&job.executor);
            }
        }

        let task = self.board.get(&job.task_id)?;

        // Attestation is fail-closed: a mismatch rejects the submission
        // outright and routes to a human.
        if let Some(reported) = attested_hashes {
            if let Some(expected) = self.attestations.get(job_id) {
                if let Err(reason) = verify_attestation(&expected, reported) {
                    warn!(job_id, %reason, "Attestation verification failed");
                    self.bus.publish(OrchestrationEvent::AttestationFailed {
                        job_id: job_id.to_string(),
                        pack_id: job.context_pack_id.clone(),
                        path: reason.clone(),
                        timestamp: Utc::now(),
                    });
                    let status = self.apply_failure(
                        &task.id,
                        &job,
                        BreachCode::PolicyViolation,
                        VerdictDecision::Reject,
                    )?;
                    return Ok(SettleOutcome {
                        job_id: job_id.to_string(),
                        task_id: task.id.clone(),
                        verdict: None,
                        task_status: status,
                        ignored: false,
                    });
                }
            }
        }

        // Executor-level failure: bounded automatic retry of the same job,
        // absorbed without consuming the task's quality budget.
        if exit_code != 0 {
            if let Some(requeued) = self.queue.retry_after_error(job_id)? {
                info!(job_id, requeue_count = requeued.requeue_count, "Executor error; job requeued");
                return Ok(SettleOutcome {
                    job_id: job_id.to_string(),
                    task_id: task.id.clone(),
                    verdict: None,
                    task_status: task.status,
                    ignored: false,
                });
            }
            let status = self.apply_failure(
                &task.id,
                &job,
                BreachCode::ExecutorError,
                VerdictDecision::Escalate,
            )?;
            return Ok(SettleOutcome {
                job_id: job_id.to_string(),
                task_id: task.id.clone(),
                verdict: None,
                task_status: status,
                ignored: false,
            });
        }

        let null = serde_json::Value::Null;
        let verdict = self
            .judge
            .evaluate_value(&task, submission.unwrap_or(&null));
        self.verdicts.put(&task.id, verdict.clone());
        self.bus.publish(OrchestrationEvent::VerdictIssued {
            task_id: task.id.clone(),
            job_id: job_id.to_string(),
            verdict: verdict.verdict.to_string(),
            reason: verdict.reason.clone(),
            timestamp: Utc::now(),
        });

        let task_status = match verdict.verdict {
            VerdictDecision::Done => {
                self.board.transition(&task.id, TaskEvent::Completed)?.status
            }
            decision => {
                let breach = verdict.breach.unwrap_or(BreachCode::ExecutorError);
                if breach == BreachCode::ScopeConflict {
                    self.board.record_scope_breach(&task.id)?;
                }
                if decision == VerdictDecision::Retry && breach.consumes_attempt() {
                    self.board.record_attempt(&task.id)?;
                }
                self.apply_failure(&task.id, &job, breach, decision)?
            }
        };

        Ok(SettleOutcome {
            job_id: job_id.to_string(),
            task_id: task.id.clone(),
            verdict: Some(verdict),
            task_status,
            ignored: false,
        })
    }

    /// Route a failure through the escalation ladder and apply the decided
    /// level to the board. Returns the task's resulting status.
    fn apply_failure(
        &self,
        task_id: &str,
        job: &Job,
        breach: BreachCode,
        decision: VerdictDecision,
    ) -> OrchestratorResult<TaskStatus> {
        let task = self.board.get(task_id)?;
        let level = self
            .escalation
            .decide(task_id, breach, task.attempts, task.max_attempts);
        self.board.raise_escalation_level(task_id, level.as_u8())?;
        self.bus.publish(OrchestrationEvent::EscalationDecided {
            task_id: task_id.to_string(),
            breach,
            level: level.as_u8(),
            action: level.action().to_string(),
            timestamp: Utc::now(),
        });

        let status = match level {
            EscalationLevel::Level3 => {
                // Human hold. From in_progress the task blocks; a task
                // already failed stays failed and surfaces in /debug/failures.
                match self.board.transition(task_id, TaskEvent::Blocked) {
                    Ok(task) => task.status,
                    Err(BoardError::InvalidTransition { .. }) => self.board.get(task_id)?.status,
                    Err(e) => return Err(e.into()),
                }
            }
            EscalationLevel::Level4 => {
                let task = self.board.transition(task_id, TaskEvent::Failed)?;
                let task = self.board.transition(&task.id, TaskEvent::DeadLettered)?;
                self.bus.publish(OrchestrationEvent::TaskDeadLettered {
                    task_id: task_id.to_string(),
                    reason: breach,
                    attempts: task.attempts,
                    timestamp: Utc::now(),
                });
                task.status
            }
            level => {
                let task = self.board.transition(task_id, TaskEvent::Failed)?;

                // Level0 re-enters the queue only for genuine retry
                // verdicts: rejects (scope, schema) are never auto-repaired
                // and resource breaches are never blindly retried. A
                // Level1/2 decision is an automated recovery in its own
                // right and retries with a fresh budget at the wider tier.
                let auto_retry = decision == VerdictDecision::Retry
                    || matches!(level, EscalationLevel::Level1 | EscalationLevel::Level2);
                if !auto_retry {
                    return Ok(task.status);
                }

                let mut model = job.model.clone();
                match level {
                    EscalationLevel::Level1 => {
                        model = self.next_in_ladder(&self.config.ladders.models, &job.model);
                        self.board.widen_models(task_id, &model)?;
                        self.board.reset_attempts(task_id)?;
                    }
                    EscalationLevel::Level2 => {
                        let role = self.next_in_ladder(&self.config.ladders.roles, &task.role);
                        self.board.upgrade_role(task_id, &role)?;
                        self.board.reset_attempts(task_id)?;
                    }
                    _ => {}
                }

                self.board.transition(task_id, TaskEvent::Retried)?;
                match self.dispatch(task_id, Some(&job.executor), Some(&model), job.runner)? {
                    DispatchOutcome::Dispatched { .. } => {
                        self.board.get(task_id)?.status
                    }
                    DispatchOutcome::Deferred { .. } => TaskStatus::Ready,
                }
            }
        };
        Ok(status)
    }

    /// Next rung of an upgrade ladder; the top rung upgrades to itself
    fn next_in_ladder(&self, ladder: &[String], current: &str) -> String {
        match ladder.iter().position(|entry| entry == current) {
            Some(idx) => ladder
                .get(idx + 1)
                .cloned()
                .unwrap_or_else(|| current.to_string()),
            None => ladder
                .first()
                .cloned()
                .unwrap_or_else(|| current.to_string()),
        }
    }

    /// Human unblock: resolve the Level3 hold and make the task ready
    pub fn unblock(&self, task_id: &str) -> OrchestratorResult<TaskStatus> {
        self.escalation.resolve_by_human(task_id);
        let task = self.board.transition(task_id, TaskEvent::Unblocked)?;
        Ok(task.status)
    }

    /// Lease sweep: requeue expired claims, escalate poison jobs
    pub fn reap(&self) -> OrchestratorResult<usize> {
        let changed = self.queue.reap_expired();
        let count = changed.len();
        for job in changed {
            if job.status == JobStatus::Failed {
                // Poison job: out of requeues, no blind retry
                self.apply_failure(
                    &job.task_id,
                    &job,
                    BreachCode::TimeoutExceeded,
                    VerdictDecision::Escalate,
                )?;
            }
        }
        Ok(count)
    }

    /// Persist the durable job snapshot
    pub fn persist(&self) -> OrchestratorResult<()> {
        if let Some(path) = &self.snapshot_path {
            save_jobs(path, &self.queue.snapshot_jobs())?;
        }
        Ok(())
    }

    /// Last verdict recorded for a task
    pub fn last_verdict(&self, task_id: &str) -> Option<Verdict> {
        self.verdicts.get(task_id)
    }
}
