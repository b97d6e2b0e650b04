//! Friendship records derived from an accepted request.

use chrono::{DateTime, Utc};
use common::UserId;
use serde::{Deserialize, Serialize};

/// One direction of a friendship, keyed by `(user_id, friend_id)`.
///
/// Accepting a request always produces the reciprocal pair; a single row
/// on its own is an inconsistency the saga must never leave behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Friendship {
    pub user_id: UserId,
    pub friend_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl Friendship {
    /// Creates a single friendship row.
    pub fn new(user_id: UserId, friend_id: UserId, created_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            friend_id,
            created_at,
        }
    }

    /// Derives the reciprocal pair for an accepted request.
    ///
    /// The receiver's row comes first: the receiver acted, so their friend
    /// list updates before the requester's.
    pub fn reciprocal_pair(
        requester_id: UserId,
        receiver_id: UserId,
        at: DateTime<Utc>,
    ) -> [Friendship; 2] {
        [
            Friendship::new(receiver_id, requester_id, at),
            Friendship::new(requester_id, receiver_id, at),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reciprocal_pair_mirrors_ids() {
        let requester = UserId::new();
        let receiver = UserId::new();
        let at = Utc::now();

        let [first, second] = Friendship::reciprocal_pair(requester, receiver, at);

        assert_eq!(first.user_id, receiver);
        assert_eq!(first.friend_id, requester);
        assert_eq!(second.user_id, requester);
        assert_eq!(second.friend_id, receiver);
        assert_eq!(first.created_at, at);
        assert_eq!(second.created_at, at);
    }
}
