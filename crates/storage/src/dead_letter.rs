use chrono::{DateTime, Utc};
use common::SagaId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::outbox::OutboxEventId;

/// Unique identifier for a dead-letter row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeadLetterId(Uuid);

impl DeadLetterId {
    /// Creates a new random dead-letter ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a dead-letter ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for DeadLetterId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DeadLetterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An event or saga that exhausted its retry budget and awaits manual
/// resolution.
///
/// Created by the relay once an outbox row's retries run out, or by the
/// orchestrator when a compensation itself fails — in the latter case the
/// payload carries the serialized saga context for manual reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEvent {
    pub id: DeadLetterId,
    pub original_event_id: Option<OutboxEventId>,
    pub saga_id: SagaId,
    pub saga_state: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub failure_reason: String,
    pub failure_count: i32,
    pub last_failure_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_note: Option<String>,
}

/// The caller-supplied parts of a new dead-letter row.
#[derive(Debug, Clone)]
pub struct NewDeadLetterEvent {
    pub original_event_id: Option<OutboxEventId>,
    pub saga_id: SagaId,
    pub saga_state: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub failure_reason: String,
    pub failure_count: i32,
}

impl NewDeadLetterEvent {
    /// Stamps id, timestamps, and resolution defaults onto a full row.
    pub fn into_event(self) -> DeadLetterEvent {
        let now = Utc::now();
        DeadLetterEvent {
            id: DeadLetterId::new(),
            original_event_id: self.original_event_id,
            saga_id: self.saga_id,
            saga_state: self.saga_state,
            event_type: self.event_type,
            payload: self.payload,
            failure_reason: self.failure_reason,
            failure_count: self.failure_count,
            last_failure_at: now,
            created_at: now,
            resolved: false,
            resolved_at: None,
            resolved_by: None,
            resolution_note: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_event_starts_unresolved() {
        let event = NewDeadLetterEvent {
            original_event_id: None,
            saga_id: SagaId::new(),
            saga_state: "Failed".to_string(),
            event_type: "FriendAdded".to_string(),
            payload: serde_json::json!({}),
            failure_reason: "publish timed out".to_string(),
            failure_count: 5,
        }
        .into_event();

        assert!(!event.resolved);
        assert!(event.resolved_at.is_none());
        assert!(event.resolved_by.is_none());
        assert!(event.resolution_note.is_none());
        assert_eq!(event.failure_count, 5);
    }
}
