//! Lifecycle event stream
//!
//! Subscribers (audit logs, UI push, tests) receive every reactivation,
//! transition, purge, classification fallback and finished maintenance run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{LifecycleState, MemoryId, RunStatus};

const CHANNEL_CAPACITY: usize = 1000;

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Reactivated {
        memory_id: MemoryId,
        from_state: LifecycleState,
    },
    Transitioned {
        memory_id: MemoryId,
        from: LifecycleState,
        to: LifecycleState,
    },
    Purged {
        memory_id: MemoryId,
    },
    ClassificationFallback {
        reason: String,
    },
    MaintenanceCompleted {
        status: RunStatus,
        recalculated: u64,
        transitions: u64,
        purged: u64,
        remaining: u64,
    },
}

/// A lifecycle event with the engine-clock time it occurred
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl LifecycleEvent {
    pub fn new(timestamp: DateTime<Utc>, kind: EventKind) -> Self {
        Self { timestamp, kind }
    }

    pub fn reactivated(timestamp: DateTime<Utc>, memory_id: MemoryId, from_state: LifecycleState) -> Self {
        Self::new(
            timestamp,
            EventKind::Reactivated {
                memory_id,
                from_state,
            },
        )
    }

    pub fn transitioned(
        timestamp: DateTime<Utc>,
        memory_id: MemoryId,
        from: LifecycleState,
        to: LifecycleState,
    ) -> Self {
        Self::new(timestamp, EventKind::Transitioned { memory_id, from, to })
    }

    pub fn purged(timestamp: DateTime<Utc>, memory_id: MemoryId) -> Self {
        Self::new(timestamp, EventKind::Purged { memory_id })
    }

    pub fn classification_fallback(timestamp: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self::new(
            timestamp,
            EventKind::ClassificationFallback {
                reason: reason.into(),
            },
        )
    }

    /// Memory the event refers to, if any
    pub fn memory_id(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Reactivated { memory_id, .. }
            | EventKind::Transitioned { memory_id, .. }
            | EventKind::Purged { memory_id } => Some(memory_id),
            _ => None,
        }
    }
}

/// Fan-out of lifecycle events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    /// Slow subscribers lag and lose the oldest events beyond `capacity`
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to all current subscribers; no subscribers is not an error
    pub fn publish(&self, event: LifecycleEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
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

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish(LifecycleEvent::purged(Utc::now(), "m-1".to_string()));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let now = Utc::now();
        bus.publish(LifecycleEvent::reactivated(
            now,
            "m-1".to_string(),
            LifecycleState::Dormant,
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.memory_id(), Some("m-1"));
        assert_eq!(
            event.kind,
            EventKind::Reactivated {
                memory_id: "m-1".to_string(),
                from_state: LifecycleState::Dormant,
            }
        );
    }

    #[test]
    fn test_event_json_shape() {
        let event = LifecycleEvent::transitioned(
            Utc::now(),
            "m-2".to_string(),
            LifecycleState::Active,
            LifecycleState::Dormant,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "transitioned");
        assert_eq!(json["from"], "ACTIVE");
        assert_eq!(json["to"], "DORMANT");
        assert!(json["timestamp"].is_string());

        let back: LifecycleEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
