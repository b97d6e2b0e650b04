//! Friend-request aggregate.

use chrono::{DateTime, Utc};
use common::{UserId, Version};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Lifecycle status of a friend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Awaiting a response from the receiver.
    #[default]
    Pending,

    /// The receiver accepted the request (terminal).
    Accepted,

    /// The receiver rejected the request (terminal).
    Rejected,
}

impl RequestStatus {
    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
        }
    }

    /// Parses a stored status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RequestStatus::Pending),
            "accepted" => Some(RequestStatus::Accepted),
            "rejected" => Some(RequestStatus::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Capture of the mutable request fields taken before acceptance, exactly
/// sufficient to reverse the transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub status: RequestStatus,
    pub responded_at: Option<DateTime<Utc>>,
}

/// A friend request between two users, keyed by `(requester, receiver)`.
///
/// Carries an optimistic-locking [`Version`]; every persisted update must
/// name the version it read, and the store rejects stale writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendRequest {
    requester_id: UserId,
    receiver_id: UserId,
    status: RequestStatus,
    responded_at: Option<DateTime<Utc>>,
    version: Version,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl FriendRequest {
    /// Creates a new pending request.
    pub fn new(requester_id: UserId, receiver_id: UserId) -> Result<Self, DomainError> {
        if requester_id == receiver_id {
            return Err(DomainError::SelfFriendship);
        }
        let now = Utc::now();
        Ok(Self {
            requester_id,
            receiver_id,
            status: RequestStatus::Pending,
            responded_at: None,
            version: Version::first(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Reconstructs a request from its persisted parts.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        requester_id: UserId,
        receiver_id: UserId,
        status: RequestStatus,
        responded_at: Option<DateTime<Utc>>,
        version: Version,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            requester_id,
            receiver_id,
            status,
            responded_at,
            version,
            created_at,
            updated_at,
        }
    }

    pub fn requester_id(&self) -> UserId {
        self.requester_id
    }

    pub fn receiver_id(&self) -> UserId {
        self.receiver_id
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn responded_at(&self) -> Option<DateTime<Utc>> {
        self.responded_at
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Called by the store after a successful versioned update.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Captures the fields [`accept`](Self::accept) mutates.
    pub fn snapshot(&self) -> RequestSnapshot {
        RequestSnapshot {
            status: self.status,
            responded_at: self.responded_at,
        }
    }

    /// Transitions a pending request to accepted, stamping `responded_at`.
    pub fn accept(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status != RequestStatus::Pending {
            return Err(DomainError::InvalidStatusTransition {
                expected: RequestStatus::Pending,
                actual: self.status,
            });
        }
        self.status = RequestStatus::Accepted;
        self.responded_at = Some(at);
        self.updated_at = at;
        Ok(())
    }

    /// Restores the snapshotted fields, reversing an acceptance.
    pub fn restore(&mut self, snapshot: &RequestSnapshot) {
        self.status = snapshot.status;
        self.responded_at = snapshot.responded_at;
        self.updated_at = Utc::now();
    }
}
