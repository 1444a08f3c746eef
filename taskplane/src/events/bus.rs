//! Event bus — broadcast pub/sub with bounded history and durable append
//!
//! Publishing never blocks on subscribers. When a JSONL sink is attached,
//! the line is appended before the broadcast so the durable record is at
//! least as complete as anything a subscriber saw.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::log::JsonlEventLog;
use super::types::OrchestrationEvent;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Default number of events retained in the in-memory ring
const DEFAULT_HISTORY: usize = 512;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Event bus with broadcast, bounded history, and optional persistence
pub struct EventBus {
    sender: broadcast::Sender<OrchestrationEvent>,
    history: Mutex<VecDeque<OrchestrationEvent>>,
    history_cap: usize,
    sink: Option<JsonlEventLog>,
}

impl EventBus {
    /// Create a bus without durable persistence
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            history: Mutex::new(VecDeque::with_capacity(DEFAULT_HISTORY)),
            history_cap: DEFAULT_HISTORY,
            sink: None,
        }
    }

    /// Create a bus that appends every event to a JSONL log
    pub fn with_sink(sink: JsonlEventLog) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            history: Mutex::new(VecDeque::with_capacity(DEFAULT_HISTORY)),
            history_cap: DEFAULT_HISTORY,
            sink: Some(sink),
        }
    }

    /// Create a shared reference to this bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event: durable append, history ring, then broadcast.
    ///
    /// A failed durable append is logged and does not abort the state
    /// transition that produced the event; the in-memory trail still holds it.
    pub fn publish(&self, event: OrchestrationEvent) {
        let event_type = event.event_type();

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.append(&event) {
                warn!(event_type, "Failed to persist event: {}", e);
            }
        }

        {
            let mut history = self.history.lock().expect("event history mutex poisoned");
            if history.len() == self.history_cap {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // No receivers is fine; the history and sink already have it
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "Event published"),
            Err(_) => debug!(event_type, "Event published (no receivers)"),
        }
    }

    /// Subscribe to receive future events
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.sender.subscribe()
    }

    /// Most recent `limit` events from the in-memory ring (oldest first)
    pub fn recent(&self, limit: usize) -> Vec<OrchestrationEvent> {
        let history = self.history.lock().expect("event history mutex poisoned");
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(task: &str) -> OrchestrationEvent {
        OrchestrationEvent::TaskCreated {
            task_id: task.to_string(),
            kind: "atomic".to_string(),
            lane: "default".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(sample("task-1"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type(), "task_created");
    }

    #[test]
    fn test_history_ring_bounded() {
        let mut bus = EventBus::new();
        bus.history_cap = 3;

        for i in 0..5 {
            bus.publish(sample(&format!("task-{}", i)));
        }

        let recent = bus.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].task_id(), Some("task-2"));
        assert_eq!(recent[2].task_id(), Some("task-4"));
    }

    #[test]
    fn test_publish_with_sink_persists() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlEventLog::open(dir.path().join("events.jsonl")).unwrap();
        let bus = EventBus::with_sink(sink);

        bus.publish(sample("task-1"));
        bus.publish(sample("task-2"));

        let log = JsonlEventLog::open(dir.path().join("events.jsonl")).unwrap();
        let events = log.read_recent(10).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_recent_limit() {
        let bus = EventBus::new();
        for i in 0..4 {
            bus.publish(sample(&format!("task-{}", i)));
        }
        let recent = bus.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].task_id(), Some("task-3"));
    }
}
