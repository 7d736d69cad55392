//! Transition event records.
//!
//! Every successful state change on an agent, task, or message produces one
//! immutable [`TransitionEvent`]. Observers (dashboards, activity feeds)
//! subscribe to the bus; the core defines the event shape but not how it is
//! transported further. Events are emitted only after the storage
//! transaction that produced them has committed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Which entity a transition happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Agent,
    Task,
    Message,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Agent => "agent",
            EntityKind::Task => "task",
            EntityKind::Message => "message",
        }
    }
}

/// One state transition on one entity.
///
/// `from` is `None` when the entity was just created.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionEvent {
    pub entity: EntityKind,
    pub entity_id: Uuid,
    pub from: Option<String>,
    pub to: String,
    pub at: DateTime<Utc>,
    /// Agent that caused the transition, if it was an agent action rather
    /// than an operator one.
    pub actor: Option<Uuid>,
}

impl TransitionEvent {
    pub fn new(
        entity: EntityKind,
        entity_id: Uuid,
        from: Option<impl Into<String>>,
        to: impl Into<String>,
        actor: Option<Uuid>,
    ) -> Self {
        Self {
            entity,
            entity_id,
            from: from.map(Into::into),
            to: to.into(),
            at: Utc::now(),
            actor,
        }
    }
}

/// Broadcast bus for transition events.
///
/// Dropping all receivers is fine; `emit` never fails. Receivers that lag
/// past the channel capacity lose the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TransitionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: TransitionEvent) {
        debug!(
            entity = event.entity.as_str(),
            entity_id = %event.entity_id,
            from = event.from.as_deref().unwrap_or("-"),
            to = %event.to,
            "transition"
        );
        // Err means no subscribers, which is not an error for us.
        let _ = self.tx.send(event);
    }

    pub fn emit_all(&self, events: impl IntoIterator<Item = TransitionEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_is_ok() {
        let bus = EventBus::new(8);
        bus.emit(TransitionEvent::new(
            EntityKind::Task,
            Uuid::new_v4(),
            None::<String>,
            "pending",
            None,
        ));
    }

    #[tokio::test]
    async fn test_subscriber_sees_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();

        bus.emit(TransitionEvent::new(
            EntityKind::Task,
            id,
            None::<String>,
            "pending",
            None,
        ));
        bus.emit(TransitionEvent::new(
            EntityKind::Task,
            id,
            Some("pending"),
            "in_progress",
            None,
        ));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.to, "pending");
        assert!(first.from.is_none());

        let second = rx.recv().await.unwrap();
        assert_eq!(second.from.as_deref(), Some("pending"));
        assert_eq!(second.to, "in_progress");
    }

    #[test]
    fn test_event_serializes_snake_case() {
        let event = TransitionEvent::new(
            EntityKind::Message,
            Uuid::new_v4(),
            Some("pending"),
            "approved",
            None,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["entity"], "message");
        assert_eq!(json["to"], "approved");
    }
}
