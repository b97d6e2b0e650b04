use async_trait::async_trait;
use common::{SagaId, UserId, Version};
use domain::{FriendRequest, Friendship};

use crate::dead_letter::{DeadLetterEvent, DeadLetterId, NewDeadLetterEvent};
use crate::outbox::{NewOutboxEvent, OutboxEvent, OutboxEventId};
use crate::Result;

/// Outcome of a conflict-tolerant insert.
///
/// Both variants are success from the caller's perspective: an existing row
/// means an earlier attempt (or a concurrent one) already applied the same
/// logical write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was written.
    Inserted,
    /// A row with the same key already exists; nothing was written.
    AlreadyExists,
}

/// An open transaction spanning friendship creation and outbox staging.
///
/// Opened before the relationship writes, committed only after the outbox
/// rows are staged, so the two effects land atomically. Dropping the
/// session without committing rolls everything back.
#[async_trait]
pub trait StagingSession: Send + Sync {
    /// Inserts one friendship row; an existing row with the same natural
    /// key is [`InsertOutcome::AlreadyExists`].
    async fn insert_friendship(&mut self, friendship: &Friendship) -> Result<InsertOutcome>;

    /// Inserts one outbox row; an existing row with the same idempotency
    /// key is [`InsertOutcome::AlreadyExists`].
    async fn insert_outbox_event(&mut self, event: NewOutboxEvent) -> Result<InsertOutcome>;

    /// Commits every write made through this session.
    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Store over friend requests, friendships, the transactional outbox, and
/// the dead-letter table.
///
/// All implementations must be thread-safe (Send + Sync). Updates to
/// friend requests use optimistic concurrency: the caller names the version
/// it read and the store rejects stale writes with
/// [`StorageError::ConcurrencyConflict`](crate::StorageError::ConcurrencyConflict).
#[async_trait]
pub trait SocialStore: Send + Sync {
    // -- Friend requests --

    /// Inserts a new friend request at version 1.
    async fn insert_request(&self, request: &FriendRequest) -> Result<()>;

    /// Loads a request by its `(requester, receiver)` key, any status.
    async fn find_request(
        &self,
        requester_id: UserId,
        receiver_id: UserId,
    ) -> Result<Option<FriendRequest>>;

    /// Loads a request only if it is still pending.
    async fn find_pending_request(
        &self,
        requester_id: UserId,
        receiver_id: UserId,
    ) -> Result<Option<FriendRequest>>;

    /// Persists a mutated request, expecting the stored row to still be at
    /// `expected_version`. Returns the new version on success.
    async fn update_request(
        &self,
        request: &FriendRequest,
        expected_version: Version,
    ) -> Result<Version>;

    // -- Friendships --

    /// Returns true if the friendship row exists.
    async fn friendship_exists(&self, user_id: UserId, friend_id: UserId) -> Result<bool>;

    /// Lists a user's friendships.
    async fn friendships_for(&self, user_id: UserId) -> Result<Vec<Friendship>>;

    /// Deletes a friendship row by natural key. Returns false if the row
    /// was already gone.
    async fn delete_friendship(&self, user_id: UserId, friend_id: UserId) -> Result<bool>;

    /// Opens the transaction shared by relationship creation and event
    /// staging.
    async fn begin_staging(&self) -> Result<Box<dyn StagingSession>>;

    // -- Outbox --

    /// Returns true if an outbox row exists for the idempotency key.
    async fn outbox_event_exists(&self, idempotency_key: &str) -> Result<bool>;

    /// Lists every outbox row staged by a saga invocation.
    async fn outbox_events_for_saga(&self, saga_id: SagaId) -> Result<Vec<OutboxEvent>>;

    /// Selects unprocessed rows, oldest first.
    async fn unprocessed_events(&self, limit: u32) -> Result<Vec<OutboxEvent>>;

    /// Marks a row as successfully relayed.
    async fn mark_processed(&self, id: OutboxEventId) -> Result<()>;

    /// Increments a row's retry count and records the relay error.
    /// Returns the updated row.
    async fn record_relay_failure(&self, id: OutboxEventId, error: &str) -> Result<OutboxEvent>;

    /// Removes a row from active processing (after dead-lettering).
    async fn remove_outbox_event(&self, id: OutboxEventId) -> Result<()>;

    /// Deletes every unprocessed row staged by a saga invocation.
    /// Returns the number of rows removed.
    async fn delete_unprocessed_for_saga(&self, saga_id: SagaId) -> Result<u64>;

    // -- Dead letters --

    /// Records a permanently failed event or saga for manual resolution.
    async fn insert_dead_letter(&self, dead_letter: NewDeadLetterEvent) -> Result<DeadLetterEvent>;

    /// Lists unresolved dead letters, oldest first.
    async fn unresolved_dead_letters(&self) -> Result<Vec<DeadLetterEvent>>;

    /// Marks a dead letter resolved by an operator.
    async fn resolve_dead_letter(
        &self,
        id: DeadLetterId,
        resolved_by: &str,
        note: &str,
    ) -> Result<()>;
}
