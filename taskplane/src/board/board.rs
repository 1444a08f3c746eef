//! The board: task creation, splitting, transitions, and WIP accounting

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::events::{OrchestrationEvent, SharedEventBus};
use crate::store::MemStore;

use super::task::{next_status, Task, TaskEvent, TaskKind, TaskSpec, TaskStatus};

/// Error type for board operations
#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("INVALID_TRANSITION: task {task_id} cannot go {from} -> {event:?}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        event: TaskEvent,
    },

    #[error("Pins invalid for task {task_id}: {reason}")]
    InvalidPins { task_id: String, reason: String },

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Task {0} is a parent; split it into atomic children before dispatch")]
    ParentNotDispatchable(String),

    #[error("Retry budget exhausted for task {task_id} ({attempts}/{max_attempts})")]
    AttemptsExhausted {
        task_id: String,
        attempts: u32,
        max_attempts: u32,
    },
}

/// Result type for board operations
pub type BoardResult<T> = Result<T, BoardError>;

/// Aggregate view served by `GET /board`
#[derive(Debug, Clone, Serialize)]
pub struct BoardSummary {
    pub counts: HashMap<TaskStatus, usize>,
    pub wip: HashMap<String, usize>,
    pub tasks: Vec<Task>,
}

/// The authoritative task state machine
pub struct TaskBoard {
    tasks: MemStore<Task>,
    /// Per-lane in_progress caps; lanes not listed use `default_wip_limit`
    wip_limits: HashMap<String, usize>,
    default_wip_limit: usize,
    /// Roles the prompt/template collaborator knows how to render.
    /// Empty means "accept any" (single-tenant deployments).
    known_roles: Vec<String>,
    default_max_attempts: u32,
    bus: SharedEventBus,
}

impl TaskBoard {
    pub fn new(
        wip_limits: HashMap<String, usize>,
        default_wip_limit: usize,
        known_roles: Vec<String>,
        default_max_attempts: u32,
        bus: SharedEventBus,
    ) -> Self {
        Self {
            tasks: MemStore::new(),
            wip_limits,
            default_wip_limit,
            known_roles,
            default_max_attempts,
            bus,
        }
    }

    /// Validate and register a new task in `backlog`
    pub fn create_task(&self, spec: TaskSpec) -> BoardResult<Task> {
        if !self.known_roles.is_empty() && !self.known_roles.contains(&spec.role) {
            return Err(BoardError::UnknownRole(spec.role));
        }

        let kind = spec.kind.unwrap_or(TaskKind::Atomic);
        let task = Task::new(spec, kind, self.default_max_attempts);

        if kind == TaskKind::Atomic {
            let conflicts = task.pins.conflicting_paths();
            if !conflicts.is_empty() {
                return Err(BoardError::InvalidPins {
                    task_id: task.id,
                    reason: format!("paths in both allow and forbid lists: {:?}", conflicts),
                });
            }
            if task.pins.allowed_paths.is_empty() {
                return Err(BoardError::InvalidPins {
                    task_id: task.id,
                    reason: "allowed_paths is empty".to_string(),
                });
            }
        }

        self.tasks.insert(&task.id, task.clone());
        self.bus.publish(OrchestrationEvent::TaskCreated {
            task_id: task.id.clone(),
            kind: format!("{:?}", task.kind).to_lowercase(),
            lane: task.lane.clone(),
            timestamp: Utc::now(),
        });
        info!(task_id = %task.id, lane = %task.lane, "Task created");
        Ok(task)
    }

    /// Split a parent into atomic children bound to it
    pub fn split(&self, parent_id: &str, child_specs: Vec<TaskSpec>) -> BoardResult<Vec<Task>> {
        let parent = self.get(parent_id)?;
        if parent.kind != TaskKind::Parent {
            return Err(BoardError::InvalidPins {
                task_id: parent_id.to_string(),
                reason: "only parent tasks can be split".to_string(),
            });
        }

        let mut children = Vec::with_capacity(child_specs.len());
        for mut spec in child_specs {
            spec.kind = Some(TaskKind::Atomic);
            if spec.lane.is_none() {
                spec.lane = Some(parent.lane.clone());
            }
            let created = self.create_task(spec)?;
            let child = self
                .tasks
                .update(&created.id, |t| {
                    t.parent_id = Some(parent_id.to_string());
                    t.touch();
                    t.clone()
                })
                .ok_or_else(|| BoardError::NotFound(created.id.clone()))?;
            children.push(child);
        }

        self.bus.publish(OrchestrationEvent::TaskSplit {
            parent_id: parent_id.to_string(),
            child_ids: children.iter().map(|c| c.id.clone()).collect(),
            timestamp: Utc::now(),
        });
        Ok(children)
    }

    /// Apply a lifecycle event. Illegal edges fail without mutating.
    pub fn transition(&self, task_id: &str, event: TaskEvent) -> BoardResult<Task> {
        // Guards that need a consistent read happen inside the per-key lock.
        let outcome = self
            .tasks
            .update(task_id, |task| -> BoardResult<(TaskStatus, Task)> {
                let from = task.status;
                let to = next_status(from, event).ok_or(BoardError::InvalidTransition {
                    task_id: task_id.to_string(),
                    from,
                    event,
                })?;

                match event {
                    TaskEvent::Dispatched => {
                        if task.kind == TaskKind::Parent {
                            return Err(BoardError::ParentNotDispatchable(task_id.to_string()));
                        }
                        if !task.pins.is_valid() {
                            return Err(BoardError::InvalidPins {
                                task_id: task_id.to_string(),
                                reason: "pins empty or contradictory".to_string(),
                            });
                        }
                    }
                    TaskEvent::Retried => {
                        if task.attempts >= task.max_attempts {
                            return Err(BoardError::AttemptsExhausted {
                                task_id: task_id.to_string(),
                                attempts: task.attempts,
                                max_attempts: task.max_attempts,
                            });
                        }
                    }
                    _ => {}
                }

                task.status = to;
                task.touch();
                Ok((from, task.clone()))
            })
            .ok_or_else(|| BoardError::NotFound(task_id.to_string()))??;

        let (from, task) = outcome;
        self.bus.publish(OrchestrationEvent::TaskTransitioned {
            task_id: task_id.to_string(),
            from,
            to: task.status,
            event,
            timestamp: Utc::now(),
        });
        Ok(task)
    }

    /// Ready tasks in a lane, truncated to the lane's free WIP capacity.
    /// An empty result under load is a scheduling deferral, not an error.
    pub fn list_ready(&self, lane: &str) -> Vec<Task> {
        let capacity = self.free_capacity(lane);
        let mut ready: Vec<Task> = self
            .tasks
            .list()
            .into_iter()
            .filter(|t| t.status == TaskStatus::Ready && t.lane == lane)
            .collect();
        ready.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        ready.truncate(capacity);
        ready
    }

    /// Whether the lane has room for one more in_progress task
    pub fn has_capacity(&self, lane: &str) -> bool {
        self.free_capacity(lane) > 0
    }

    fn free_capacity(&self, lane: &str) -> usize {
        let limit = self
            .wip_limits
            .get(lane)
            .copied()
            .unwrap_or(self.default_wip_limit);
        limit.saturating_sub(self.count_in_progress(lane))
    }

    pub fn count_in_progress(&self, lane: &str) -> usize {
        self.tasks
            .list()
            .iter()
            .filter(|t| t.status == TaskStatus::InProgress && t.lane == lane)
            .count()
    }

    pub fn get(&self, task_id: &str) -> BoardResult<Task> {
        self.tasks
            .get(task_id)
            .ok_or_else(|| BoardError::NotFound(task_id.to_string()))
    }

    pub fn list(&self) -> Vec<Task> {
        self.tasks.list()
    }

    /// Record that a quality attempt was consumed
    pub fn record_attempt(&self, task_id: &str) -> BoardResult<Task> {
        self.mutate(task_id, |t| t.attempts += 1)
    }

    /// Grant a fresh quality budget (model/role upgrades retry from zero)
    pub fn reset_attempts(&self, task_id: &str) -> BoardResult<Task> {
        self.mutate(task_id, |t| t.attempts = 0)
    }

    /// Record a scope rejection (separate counter from `attempts`)
    pub fn record_scope_breach(&self, task_id: &str) -> BoardResult<Task> {
        self.mutate(task_id, |t| t.scope_breaches += 1)
    }

    pub fn set_last_job(&self, task_id: &str, job_id: &str) -> BoardResult<Task> {
        self.mutate(task_id, |t| t.last_job_id = Some(job_id.to_string()))
    }

    /// Raise the task's escalation level; levels never decrease
    pub fn raise_escalation_level(&self, task_id: &str, level: u8) -> BoardResult<Task> {
        self.mutate(task_id, |t| t.escalation_level = t.escalation_level.max(level))
    }

    /// Widen the model allowlist (Level-1 escalation)
    pub fn widen_models(&self, task_id: &str, model: &str) -> BoardResult<Task> {
        self.mutate(task_id, |t| {
            if !t.allowed_models.iter().any(|m| m == model) {
                t.allowed_models.push(model.to_string());
            }
        })
    }

    /// Replace the role (Level-2 escalation)
    pub fn upgrade_role(&self, task_id: &str, role: &str) -> BoardResult<Task> {
        self.mutate(task_id, |t| t.role = role.to_string())
    }

    pub fn summary(&self) -> BoardSummary {
        let tasks = self.tasks.list();
        let mut counts: HashMap<TaskStatus, usize> = HashMap::new();
        let mut wip: HashMap<String, usize> = HashMap::new();
        for task in &tasks {
            *counts.entry(task.status).or_insert(0) += 1;
            if task.status == TaskStatus::InProgress {
                *wip.entry(task.lane.clone()).or_insert(0) += 1;
            }
        }
        BoardSummary { counts, wip, tasks }
    }

    fn mutate(&self, task_id: &str, f: impl FnOnce(&mut Task)) -> BoardResult<Task> {
        self.tasks
            .update(task_id, |t| {
                f(t);
                t.touch();
                t.clone()
            })
            .ok_or_else(|| BoardError::NotFound(task_id.to_string()))
    }
}
