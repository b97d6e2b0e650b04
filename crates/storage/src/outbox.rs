use chrono::{DateTime, Utc};
use common::SagaId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxEventId(Uuid);

impl OutboxEventId {
    /// Creates a new random outbox event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an outbox event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OutboxEventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OutboxEventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A staged domain event awaiting relay to the event pipeline.
///
/// Written in the same database transaction as the aggregate change it
/// describes; the unique `idempotency_key` collapses duplicate staging
/// attempts into a single row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: OutboxEventId,
    pub saga_id: SagaId,
    pub idempotency_key: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The caller-supplied parts of a new outbox row.
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub saga_id: SagaId,
    pub idempotency_key: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl NewOutboxEvent {
    /// Stamps id, timestamps, and lifecycle defaults onto a full row.
    pub fn into_event(self) -> OutboxEvent {
        let now = Utc::now();
        OutboxEvent {
            id: OutboxEventId::new(),
            saga_id: self.saga_id,
            idempotency_key: self.idempotency_key,
            event_type: self.event_type,
            payload: self.payload,
            processed: false,
            processed_at: None,
            retry_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_event_stamps_defaults() {
        let event = NewOutboxEvent {
            saga_id: SagaId::new(),
            idempotency_key: "key".to_string(),
            event_type: "FriendAdded".to_string(),
            payload: serde_json::json!({}),
        }
        .into_event();

        assert!(!event.processed);
        assert!(event.processed_at.is_none());
        assert_eq!(event.retry_count, 0);
        assert!(event.last_error.is_none());
    }

    #[test]
    fn outbox_event_ids_are_unique() {
        assert_ne!(OutboxEventId::new(), OutboxEventId::new());
    }
}
