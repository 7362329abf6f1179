//! Instance Event Bus
//!
//! Asynchronous pub/sub notifications for entity lifecycle changes.
//! Every create publishes on `<Name>.created`, every mutation on
//! `<Name>.updated`; payloads carry the entity id under
//! `created<Name>` / `modified<Name>`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceEventKind {
    Created,
    Updated,
}

/// A lifecycle notification for one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceEvent {
    pub type_name: String,
    pub kind: InstanceEventKind,
    pub entity_id: String,
}

impl InstanceEvent {
    pub fn created(type_name: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            kind: InstanceEventKind::Created,
            entity_id: entity_id.into(),
        }
    }

    pub fn updated(type_name: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            kind: InstanceEventKind::Updated,
            entity_id: entity_id.into(),
        }
    }

    /// Topic the event is delivered on, e.g. `Submission.created`.
    pub fn topic(&self) -> String {
        match self.kind {
            InstanceEventKind::Created => format!("{}.created", self.type_name),
            InstanceEventKind::Updated => format!("{}.updated", self.type_name),
        }
    }

    /// Wire payload, e.g. `{"modifiedSubmission": "<id>"}`.
    pub fn payload(&self) -> Map<String, Value> {
        let key = match self.kind {
            InstanceEventKind::Created => format!("created{}", self.type_name),
            InstanceEventKind::Updated => format!("modified{}", self.type_name),
        };
        let mut payload = Map::new();
        payload.insert(key, Value::String(self.entity_id.clone()));
        payload
    }
}

pub struct EventBus {
    tx: broadcast::Sender<InstanceEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Publish an event to all subscribers. Delivery is best-effort;
    /// a bus without subscribers drops the event.
    pub fn publish(&self, event: InstanceEvent) {
        let _ = self.tx.send(event);
    }

    /// Create a new subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<InstanceEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    /// Process-wide bus used when a resolver is not given its own.
    pub static ref INSTANCE_EVENT_BUS: Arc<EventBus> = Arc::new(EventBus::new());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_topic_and_payload_shape() {
        let event = InstanceEvent::updated("Submission", "abc");
        assert_eq!(event.topic(), "Submission.updated");
        let payload = event.payload();
        assert_eq!(
            payload.get("modifiedSubmission").and_then(Value::as_str),
            Some("abc")
        );
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(InstanceEvent::created("Submission", "s1"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic(), "Submission.created");
        assert_eq!(event.payload().get("createdSubmission").unwrap(), "s1");
    }
}
