//! Worker registry — identity and capability declarations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::MemStore;

/// A registered worker process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: String,
    pub name: String,
    /// Executor pools this worker can drive (e.g. "claude-cli")
    pub executors: Vec<String>,
    /// Models this worker accepts; empty means any
    pub models: Vec<String>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl WorkerInfo {
    pub fn new(name: impl Into<String>, executors: Vec<String>, models: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            executors,
            models,
            registered_at: now,
            last_seen: now,
        }
    }

    /// Whether this worker may run `model` for `executor`
    pub fn accepts(&self, executor: &str, model: &str) -> bool {
        self.executors.iter().any(|e| e == executor)
            && (self.models.is_empty() || self.models.iter().any(|m| m == model))
    }
}

/// Registry of live workers
pub struct WorkerRegistry {
    workers: MemStore<WorkerInfo>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: MemStore::new(),
        }
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        executors: Vec<String>,
        models: Vec<String>,
    ) -> WorkerInfo {
        let worker = WorkerInfo::new(name, executors, models);
        self.workers.put(&worker.id, worker.clone());
        worker
    }

    pub fn get(&self, worker_id: &str) -> Option<WorkerInfo> {
        self.workers.get(worker_id)
    }

    pub fn touch(&self, worker_id: &str) {
        self.workers.update(worker_id, |w| w.last_seen = Utc::now());
    }

    pub fn list(&self) -> Vec<WorkerInfo> {
        self.workers.list()
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let registry = WorkerRegistry::new();
        let worker = registry.register(
            "box-1",
            vec!["claude-cli".to_string()],
            vec!["sonnet".to_string()],
        );
        assert!(registry.get(&worker.id).is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_accepts_matches_executor_and_model() {
        let worker = WorkerInfo::new(
            "box-1",
            vec!["claude-cli".to_string()],
            vec!["sonnet".to_string()],
        );
        assert!(worker.accepts("claude-cli", "sonnet"));
        assert!(!worker.accepts("claude-cli", "opus"));
        assert!(!worker.accepts("aider", "sonnet"));

        // Empty model list accepts any model
        let any_model = WorkerInfo::new("box-2", vec!["aider".to_string()], vec![]);
        assert!(any_model.accepts("aider", "opus"));
    }
}
