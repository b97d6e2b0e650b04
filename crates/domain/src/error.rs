//! Domain error types.

use thiserror::Error;

use crate::friend_request::RequestStatus;

/// Errors raised by domain-level state transitions.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The request is not in the state the transition requires.
    #[error("Invalid request state: expected {expected}, actual {actual}")]
    InvalidStatusTransition {
        expected: RequestStatus,
        actual: RequestStatus,
    },

    /// A user cannot send a friend request to themselves.
    #[error("Requester and receiver must be distinct users")]
    SelfFriendship,
}
