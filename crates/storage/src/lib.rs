//! Relational store boundary for the friend-acceptance saga.
//!
//! Exposes the [`SocialStore`] trait over friend requests, friendships,
//! the transactional outbox, and the dead-letter table, plus a
//! [`StagingSession`] handle for the explicit transaction spanning
//! relationship creation and event staging. Two implementations: an
//! in-memory store for tests and a PostgreSQL store backed by sqlx.

pub mod dead_letter;
pub mod error;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod store;

pub use dead_letter::{DeadLetterEvent, DeadLetterId, NewDeadLetterEvent};
pub use error::{Result, StorageError};
pub use memory::InMemorySocialStore;
pub use outbox::{NewOutboxEvent, OutboxEvent, OutboxEventId};
pub use postgres::PostgresSocialStore;
pub use store::{InsertOutcome, SocialStore, StagingSession};
