//! Domain events staged into the transactional outbox.

use chrono::{DateTime, Utc};
use common::{SagaId, UserId};
use serde::{Deserialize, Serialize};

/// Which side of the friend request an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Requester,
    Receiver,
}

impl ParticipantRole {
    /// Returns the role name used in idempotency keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Requester => "requester",
            ParticipantRole::Receiver => "receiver",
        }
    }
}

impl std::fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user gained a friend. One event per participant per acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendAdded {
    /// The user whose friend list grew.
    pub user_id: UserId,
    /// The new friend.
    pub friend_id: UserId,
    /// Which side of the original request `user_id` was on.
    pub role: ParticipantRole,
    /// When the acceptance happened.
    pub occurred_at: DateTime<Utc>,
}

impl FriendAdded {
    /// The event type string stored on outbox rows.
    pub fn event_type(&self) -> &'static str {
        "FriendAdded"
    }

    /// Derives both participants' events for an acceptance.
    pub fn for_acceptance(
        requester_id: UserId,
        receiver_id: UserId,
        at: DateTime<Utc>,
    ) -> [FriendAdded; 2] {
        [
            FriendAdded {
                user_id: receiver_id,
                friend_id: requester_id,
                role: ParticipantRole::Receiver,
                occurred_at: at,
            },
            FriendAdded {
                user_id: requester_id,
                friend_id: receiver_id,
                role: ParticipantRole::Requester,
                occurred_at: at,
            },
        ]
    }

    /// Deterministic outbox key: `<saga_id>:<event_type>:<role>`.
    ///
    /// Retries and duplicate step execution for the same invocation always
    /// derive the same key, so the outbox unique constraint collapses them
    /// into one row.
    pub fn idempotency_key(&self, saga_id: SagaId) -> String {
        format!("{}:{}:{}", saga_id, self.event_type(), self.role)
    }
}
