//! Friend-graph domain model.
//!
//! Pure domain logic for the friend-acceptance flow: the friend-request
//! aggregate with its optimistic-locking version, the reciprocal friendship
//! records it derives, and the domain events staged into the outbox.
//! No I/O lives here; persistence is the `storage` crate's concern.

pub mod error;
pub mod events;
pub mod friend_request;
pub mod friendship;

pub use error::DomainError;
pub use events::{FriendAdded, ParticipantRole};
pub use friend_request::{FriendRequest, RequestSnapshot, RequestStatus};
pub use friendship::Friendship;
