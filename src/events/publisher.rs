use crate::constants::{events, task_topic};
use crate::state_machine::TaskStatus;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Fire-and-forget publisher for live task/job updates
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    /// Subscribers filter on this, e.g. `task_<id>`
    pub topic: String,
    pub name: String,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event on `topic`. Having no subscribers is not an error.
    pub fn publish(&self, topic: impl Into<String>, name: impl Into<String>, context: Value) {
        let event = PublishedEvent {
            topic: topic.into(),
            name: name.into(),
            context,
            published_at: chrono::Utc::now(),
        };
        // send only fails when nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn publish_task_status(&self, task_id: Uuid, from: TaskStatus, to: TaskStatus, step: i64) {
        self.publish(
            task_topic(task_id),
            events::TASK_STATUS_CHANGED,
            json!({
                "task_id": task_id,
                "from": from,
                "status": to,
                "step": step,
            }),
        );
    }

    pub fn publish_log_line(&self, topic: impl Into<String>, name: &str, line: &str) {
        self.publish(topic, name, json!({ "line": line }));
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
