//! Task types and the lifecycle transition table

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task kind: parents are decomposition containers, atomics are dispatchable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Holds a goal that must be split into atomic children before execution
    Parent,
    /// A bounded unit of work with resolved pins
    Atomic,
}

/// Task lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, pins/role not yet resolved
    Backlog,
    /// Dispatchable: pins and role resolved
    Ready,
    /// A job is claimed or running for this task
    InProgress,
    /// Terminal success
    Done,
    /// Last attempt failed; may retry or dead-letter
    Failed,
    /// Awaiting human input
    Blocked,
    /// Dead-letter queue: terminal, manual-only escape
    Dlq,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Backlog => "backlog",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Dlq => "dlq",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle events accepted by `TaskBoard::transition`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEvent {
    /// Pins/role resolved: backlog → ready
    Readied,
    /// Job claimed: ready → in_progress
    Dispatched,
    /// Verdict DONE: in_progress → done
    Completed,
    /// Verdict RETRY/REJECT or infra failure: in_progress → failed
    Failed,
    /// Needs human input: in_progress → blocked
    Blocked,
    /// Retry granted (attempts remain): failed → ready
    Retried,
    /// Recovery exhausted: failed → dlq
    DeadLettered,
    /// Human unblocked: blocked → ready
    Unblocked,
}

/// The allow/forbid path set bounding what a task may read or write
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pins {
    pub allowed_paths: Vec<String>,
    #[serde(default)]
    pub forbidden_paths: Vec<String>,
}

impl Pins {
    pub fn new(allowed: Vec<String>, forbidden: Vec<String>) -> Self {
        Self {
            allowed_paths: allowed,
            forbidden_paths: forbidden,
        }
    }

    /// Paths appearing in both lists make the pin set contradictory
    pub fn conflicting_paths(&self) -> Vec<String> {
        self.allowed_paths
            .iter()
            .filter(|p| self.forbidden_paths.contains(p))
            .cloned()
            .collect()
    }

    /// Dispatchable pin sets are non-empty and conflict-free
    pub fn is_valid(&self) -> bool {
        !self.allowed_paths.is_empty() && self.conflicting_paths().is_empty()
    }

    /// Whether `path` is inside the allow set and outside the forbid set.
    ///
    /// Directory pins match by component prefix; file pins match exactly.
    pub fn permits(&self, path: &str) -> bool {
        let allowed = self.allowed_paths.iter().any(|p| path_covers(p, path));
        let forbidden = self.forbidden_paths.iter().any(|p| path_covers(p, path));
        allowed && !forbidden
    }
}

/// True when `pin` equals `path` or is a directory prefix of it
fn path_covers(pin: &str, path: &str) -> bool {
    let pin = pin.trim_end_matches('/');
    path == pin || path.strip_prefix(pin).is_some_and(|rest| rest.starts_with('/'))
}

/// Task type, selecting the context-pack byte budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Documentation-only: smallest budget, low-detail map
    Doc,
    /// Targeted bug fix
    Fix,
    /// New functionality
    Feature,
    /// Cross-cutting change: largest budget
    Refactor,
}

impl Default for TaskType {
    fn default() -> Self {
        Self::Feature
    }
}

/// Input for `TaskBoard::create_task`
#[derive(Debug, Clone, Deserialize)]
pub struct TaskSpec {
    pub title: String,
    pub goal: String,
    pub role: String,
    #[serde(default)]
    pub kind: Option<TaskKind>,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub lane: Option<String>,
    #[serde(default)]
    pub pins: Pins,
    #[serde(default)]
    pub allowed_executors: Vec<String>,
    #[serde(default)]
    pub allowed_models: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// A unit of work on the board
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub title: String,
    pub goal: String,
    pub role: String,
    pub status: TaskStatus,
    pub task_type: TaskType,
    /// Scheduling lane for WIP accounting
    pub lane: String,
    pub pins: Pins,
    pub allowed_executors: Vec<String>,
    pub allowed_models: Vec<String>,
    /// Files the issuer named when creating the task (informational)
    pub files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_job_id: Option<String>,
    /// Quality retry budget consumed so far
    pub attempts: u32,
    pub max_attempts: u32,
    /// Scope rejections; tracked separately from `attempts`
    pub scope_breaches: u32,
    /// Highest escalation level reached (monotonic per lifetime)
    pub escalation_level: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(spec: TaskSpec, kind: TaskKind, default_max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            title: spec.title,
            goal: spec.goal,
            role: spec.role,
            status: TaskStatus::Backlog,
            task_type: spec.task_type,
            lane: spec.lane.unwrap_or_else(|| "default".to_string()),
            pins: spec.pins,
            allowed_executors: spec.allowed_executors,
            allowed_models: spec.allowed_models,
            files: spec.files,
            parent_id: None,
            last_job_id: None,
            attempts: 0,
            max_attempts: spec.max_attempts.unwrap_or(default_max_attempts),
            scope_breaches: 0,
            escalation_level: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Atomic, pins valid, not parented out of execution
    pub fn is_dispatchable(&self) -> bool {
        self.kind == TaskKind::Atomic && self.pins.is_valid()
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// The lifecycle DAG. Returns the target state or None for an illegal edge.
pub fn next_status(current: TaskStatus, event: TaskEvent) -> Option<TaskStatus> {
    use TaskEvent as E;
    use TaskStatus as S;
    match (current, event) {
        (S::Backlog, E::Readied) => Some(S::Ready),
        (S::Ready, E::Dispatched) => Some(S::InProgress),
        (S::InProgress, E::Completed) => Some(S::Done),
        (S::InProgress, E::Failed) => Some(S::Failed),
        (S::InProgress, E::Blocked) => Some(S::Blocked),
        (S::Failed, E::Retried) => Some(S::Ready),
        (S::Failed, E::DeadLettered) => Some(S::Dlq),
        (S::Blocked, E::Unblocked) => Some(S::Ready),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(allowed: &[&str], forbidden: &[&str]) -> TaskSpec {
        TaskSpec {
            title: "t".to_string(),
            goal: "implement the widget".to_string(),
            role: "coder".to_string(),
            kind: Some(TaskKind::Atomic),
            task_type: TaskType::Fix,
            lane: None,
            pins: Pins::new(
                allowed.iter().map(|s| s.to_string()).collect(),
                forbidden.iter().map(|s| s.to_string()).collect(),
            ),
            allowed_executors: vec![],
            allowed_models: vec![],
            files: vec![],
            max_attempts: None,
        }
    }

    #[test]
    fn test_pins_validity() {
        assert!(Pins::new(vec!["src/a.rs".into()], vec![]).is_valid());
        assert!(!Pins::new(vec![], vec![]).is_valid());
        // Same path on both sides is contradictory
        assert!(!Pins::new(vec!["src/a.rs".into()], vec!["src/a.rs".into()]).is_valid());
    }

    #[test]
    fn test_pins_permits_prefix_and_exact() {
        let pins = Pins::new(vec!["src".into(), "docs/guide.md".into()], vec!["src/gen".into()]);
        assert!(pins.permits("src/lib.rs"));
        assert!(pins.permits("docs/guide.md"));
        assert!(!pins.permits("src/gen/out.rs"));
        assert!(!pins.permits("docs/other.md"));
        // "src" must not cover "srcery/x.rs"
        assert!(!pins.permits("srcery/x.rs"));
    }

    #[test]
    fn test_transition_table_legal_edges() {
        use TaskEvent as E;
        use TaskStatus as S;
        assert_eq!(next_status(S::Backlog, E::Readied), Some(S::Ready));
        assert_eq!(next_status(S::Ready, E::Dispatched), Some(S::InProgress));
        assert_eq!(next_status(S::InProgress, E::Completed), Some(S::Done));
        assert_eq!(next_status(S::Failed, E::Retried), Some(S::Ready));
        assert_eq!(next_status(S::Failed, E::DeadLettered), Some(S::Dlq));
        assert_eq!(next_status(S::Blocked, E::Unblocked), Some(S::Ready));
    }

    #[test]
    fn test_transition_table_illegal_edges() {
        use TaskEvent as E;
        use TaskStatus as S;
        assert_eq!(next_status(S::Backlog, E::Dispatched), None);
        assert_eq!(next_status(S::Done, E::Failed), None);
        assert_eq!(next_status(S::Dlq, E::Retried), None);
        assert_eq!(next_status(S::Ready, E::Completed), None);
    }

    #[test]
    fn test_dispatchable_requires_atomic_and_pins() {
        let task = Task::new(spec(&["src/a.rs"], &[]), TaskKind::Atomic, 3);
        assert!(task.is_dispatchable());

        let parent = Task::new(spec(&["src/a.rs"], &[]), TaskKind::Parent, 3);
        assert!(!parent.is_dispatchable());

        let empty = Task::new(spec(&[], &[]), TaskKind::Atomic, 3);
        assert!(!empty.is_dispatchable());
    }
}
