use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{SagaId, UserId, Version};
use domain::{FriendRequest, Friendship};
use tokio::sync::RwLock;

use crate::dead_letter::{DeadLetterEvent, DeadLetterId, NewDeadLetterEvent};
use crate::outbox::{NewOutboxEvent, OutboxEvent, OutboxEventId};
use crate::store::{InsertOutcome, SocialStore, StagingSession};
use crate::{Result, StorageError};

#[derive(Default)]
struct MemoryState {
    requests: HashMap<(UserId, UserId), FriendRequest>,
    friendships: HashMap<(UserId, UserId), Friendship>,
    outbox: Vec<OutboxEvent>,
    dead_letters: Vec<DeadLetterEvent>,

    // Failure injection for saga tests.
    update_calls: u32,
    conflicts_to_inject: u32,
    updates_until_failure: Option<u32>,
    fail_on_begin_staging: bool,
    fail_on_staging_commit: bool,
}

/// In-memory store implementation for testing.
///
/// Mirrors the PostgreSQL implementation's semantics, including optimistic
/// version checks and conflict-tolerant staged inserts, and adds failure
/// injection so saga retry and escalation paths can be exercised.
#[derive(Clone, Default)]
pub struct InMemorySocialStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemorySocialStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls to `update_request` fail with a
    /// concurrency conflict before touching the row.
    pub async fn set_conflicts_on_update(&self, count: u32) {
        self.state.write().await.conflicts_to_inject = count;
    }

    /// Lets the next `count` calls to `update_request` succeed, then fails
    /// every later call with a backend error.
    pub async fn set_updates_until_failure(&self, count: u32) {
        self.state.write().await.updates_until_failure = Some(count);
    }

    /// Makes `begin_staging` fail with a backend error.
    pub async fn set_fail_on_begin_staging(&self, fail: bool) {
        self.state.write().await.fail_on_begin_staging = fail;
    }

    /// Makes staged-session commits fail with a backend error.
    pub async fn set_fail_on_staging_commit(&self, fail: bool) {
        self.state.write().await.fail_on_staging_commit = fail;
    }

    /// Returns how many times `update_request` was called.
    pub async fn update_call_count(&self) -> u32 {
        self.state.read().await.update_calls
    }

    /// Returns the number of friendship rows.
    pub async fn friendship_count(&self) -> usize {
        self.state.read().await.friendships.len()
    }

    /// Returns the number of outbox rows (processed or not).
    pub async fn outbox_count(&self) -> usize {
        self.state.read().await.outbox.len()
    }

    /// Returns the number of dead-letter rows.
    pub async fn dead_letter_count(&self) -> usize {
        self.state.read().await.dead_letters.len()
    }
}

fn backend_unavailable() -> StorageError {
    StorageError::Database(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl SocialStore for InMemorySocialStore {
    async fn insert_request(&self, request: &FriendRequest) -> Result<()> {
        let mut state = self.state.write().await;
        let key = (request.requester_id(), request.receiver_id());
        if state.requests.contains_key(&key) {
            return Err(StorageError::AlreadyExists);
        }
        state.requests.insert(key, request.clone());
        Ok(())
    }

    async fn find_request(
        &self,
        requester_id: UserId,
        receiver_id: UserId,
    ) -> Result<Option<FriendRequest>> {
        let state = self.state.read().await;
        Ok(state.requests.get(&(requester_id, receiver_id)).cloned())
    }

    async fn find_pending_request(
        &self,
        requester_id: UserId,
        receiver_id: UserId,
    ) -> Result<Option<FriendRequest>> {
        let request = self.find_request(requester_id, receiver_id).await?;
        Ok(request.filter(|r| r.status() == domain::RequestStatus::Pending))
    }

    async fn update_request(
        &self,
        request: &FriendRequest,
        expected_version: Version,
    ) -> Result<Version> {
        let mut state = self.state.write().await;
        state.update_calls += 1;

        if state.conflicts_to_inject > 0 {
            state.conflicts_to_inject -= 1;
            return Err(StorageError::ConcurrencyConflict {
                expected: expected_version,
                actual: expected_version.next(),
            });
        }

        if let Some(remaining) = state.updates_until_failure {
            if remaining == 0 {
                return Err(backend_unavailable());
            }
            state.updates_until_failure = Some(remaining - 1);
        }

        let key = (request.requester_id(), request.receiver_id());
        let stored = state.requests.get_mut(&key).ok_or(StorageError::NotFound)?;

        if stored.version() != expected_version {
            return Err(StorageError::ConcurrencyConflict {
                expected: expected_version,
                actual: stored.version(),
            });
        }

        let new_version = expected_version.next();
        let mut updated = request.clone();
        updated.set_version(new_version);
        *stored = updated;
        Ok(new_version)
    }

    async fn friendship_exists(&self, user_id: UserId, friend_id: UserId) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.friendships.contains_key(&(user_id, friend_id)))
    }

    async fn friendships_for(&self, user_id: UserId) -> Result<Vec<Friendship>> {
        let state = self.state.read().await;
        let mut friendships: Vec<_> = state
            .friendships
            .values()
            .filter(|f| f.user_id == user_id)
            .cloned()
            .collect();
        friendships.sort_by_key(|f| (f.created_at, f.friend_id));
        Ok(friendships)
    }

    async fn delete_friendship(&self, user_id: UserId, friend_id: UserId) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state.friendships.remove(&(user_id, friend_id)).is_some())
    }

    async fn begin_staging(&self) -> Result<Box<dyn StagingSession>> {
        let state = self.state.read().await;
        if state.fail_on_begin_staging {
            return Err(backend_unavailable());
        }
        drop(state);

        Ok(Box::new(MemoryStagingSession {
            state: self.state.clone(),
            friendships: Vec::new(),
            events: Vec::new(),
        }))
    }

    async fn outbox_event_exists(&self, idempotency_key: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .any(|e| e.idempotency_key == idempotency_key))
    }

    async fn outbox_events_for_saga(&self, saga_id: SagaId) -> Result<Vec<OutboxEvent>> {
        let state = self.state.read().await;
        let mut events: Vec<_> = state
            .outbox
            .iter()
            .filter(|e| e.saga_id == saga_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }

    async fn unprocessed_events(&self, limit: u32) -> Result<Vec<OutboxEvent>> {
        let state = self.state.read().await;
        let mut events: Vec<_> = state
            .outbox
            .iter()
            .filter(|e| !e.processed)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.created_at);
        events.truncate(limit as usize);
        Ok(events)
    }

    async fn mark_processed(&self, id: OutboxEventId) -> Result<()> {
        let mut state = self.state.write().await;
        let event = state
            .outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StorageError::NotFound)?;
        event.processed = true;
        event.processed_at = Some(Utc::now());
        event.updated_at = Utc::now();
        Ok(())
    }

    async fn record_relay_failure(&self, id: OutboxEventId, error: &str) -> Result<OutboxEvent> {
        let mut state = self.state.write().await;
        let event = state
            .outbox
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StorageError::NotFound)?;
        event.retry_count += 1;
        event.last_error = Some(error.to_string());
        event.updated_at = Utc::now();
        Ok(event.clone())
    }

    async fn remove_outbox_event(&self, id: OutboxEventId) -> Result<()> {
        let mut state = self.state.write().await;
        state.outbox.retain(|e| e.id != id);
        Ok(())
    }

    async fn delete_unprocessed_for_saga(&self, saga_id: SagaId) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.outbox.len();
        state
            .outbox
            .retain(|e| e.saga_id != saga_id || e.processed);
        Ok((before - state.outbox.len()) as u64)
    }

    async fn insert_dead_letter(&self, dead_letter: NewDeadLetterEvent) -> Result<DeadLetterEvent> {
        let mut state = self.state.write().await;
        let event = dead_letter.into_event();
        state.dead_letters.push(event.clone());
        Ok(event)
    }

    async fn unresolved_dead_letters(&self) -> Result<Vec<DeadLetterEvent>> {
        let state = self.state.read().await;
        let mut letters: Vec<_> = state
            .dead_letters
            .iter()
            .filter(|d| !d.resolved)
            .cloned()
            .collect();
        letters.sort_by_key(|d| d.created_at);
        Ok(letters)
    }

    async fn resolve_dead_letter(
        &self,
        id: DeadLetterId,
        resolved_by: &str,
        note: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let letter = state
            .dead_letters
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or(StorageError::NotFound)?;
        letter.resolved = true;
        letter.resolved_at = Some(Utc::now());
        letter.resolved_by = Some(resolved_by.to_string());
        letter.resolution_note = Some(note.to_string());
        Ok(())
    }
}

/// Buffered staging session: writes accumulate in the session and apply
/// all-or-nothing at commit, like the PostgreSQL transaction they stand in
/// for. Dropping the session discards the buffer.
struct MemoryStagingSession {
    state: Arc<RwLock<MemoryState>>,
    friendships: Vec<Friendship>,
    events: Vec<OutboxEvent>,
}

#[async_trait]
impl StagingSession for MemoryStagingSession {
    async fn insert_friendship(&mut self, friendship: &Friendship) -> Result<InsertOutcome> {
        let key = (friendship.user_id, friendship.friend_id);
        let committed = self.state.read().await.friendships.contains_key(&key);
        let buffered = self
            .friendships
            .iter()
            .any(|f| (f.user_id, f.friend_id) == key);
        if committed || buffered {
            return Ok(InsertOutcome::AlreadyExists);
        }
        self.friendships.push(friendship.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn insert_outbox_event(&mut self, event: NewOutboxEvent) -> Result<InsertOutcome> {
        let committed = self
            .state
            .read()
            .await
            .outbox
            .iter()
            .any(|e| e.idempotency_key == event.idempotency_key);
        let buffered = self
            .events
            .iter()
            .any(|e| e.idempotency_key == event.idempotency_key);
        if committed || buffered {
            return Ok(InsertOutcome::AlreadyExists);
        }
        self.events.push(event.into_event());
        Ok(InsertOutcome::Inserted)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_on_staging_commit {
            return Err(backend_unavailable());
        }

        for friendship in self.friendships {
            state
                .friendships
                .entry((friendship.user_id, friendship.friend_id))
                .or_insert(friendship);
        }
        for event in self.events {
            // A concurrent commit may have landed the same key first; the
            // unique constraint wins.
            if !state
                .outbox
                .iter()
                .any(|e| e.idempotency_key == event.idempotency_key)
            {
                state.outbox.push(event);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::FriendAdded;

    fn pending_request() -> FriendRequest {
        FriendRequest::new(UserId::new(), UserId::new()).unwrap()
    }

    #[tokio::test]
    async fn insert_and_find_request() {
        let store = InMemorySocialStore::new();
        let request = pending_request();

        store.insert_request(&request).await.unwrap();

        let found = store
            .find_pending_request(request.requester_id(), request.receiver_id())
            .await
            .unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().version(), Version::first());
    }

    #[tokio::test]
    async fn duplicate_insert_rejected() {
        let store = InMemorySocialStore::new();
        let request = pending_request();

        store.insert_request(&request).await.unwrap();
        let result = store.insert_request(&request).await;
        assert!(matches!(result, Err(StorageError::AlreadyExists)));
    }

    #[tokio::test]
    async fn update_request_bumps_version() {
        let store = InMemorySocialStore::new();
        let mut request = pending_request();
        store.insert_request(&request).await.unwrap();

        request.accept(Utc::now()).unwrap();
        let new_version = store
            .update_request(&request, Version::first())
            .await
            .unwrap();
        assert_eq!(new_version, Version::new(2));

        let stored = store
            .find_request(request.requester_id(), request.receiver_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.version(), Version::new(2));
        assert_eq!(stored.status(), domain::RequestStatus::Accepted);
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let store = InMemorySocialStore::new();
        let mut request = pending_request();
        store.insert_request(&request).await.unwrap();

        request.accept(Utc::now()).unwrap();
        store
            .update_request(&request, Version::first())
            .await
            .unwrap();

        // Second writer still holds version 1.
        let result = store.update_request(&request, Version::first()).await;
        assert!(matches!(
            result,
            Err(StorageError::ConcurrencyConflict { .. })
        ));
    }

    #[tokio::test]
    async fn update_missing_request_is_not_found() {
        let store = InMemorySocialStore::new();
        let request = pending_request();
        let result = store.update_request(&request, Version::first()).await;
        assert!(matches!(result, Err(StorageError::NotFound)));
    }

    #[tokio::test]
    async fn staging_commit_applies_atomically() {
        let store = InMemorySocialStore::new();
        let requester = UserId::new();
        let receiver = UserId::new();
        let saga_id = SagaId::new();
        let at = Utc::now();

        let mut session = store.begin_staging().await.unwrap();
        for friendship in Friendship::reciprocal_pair(requester, receiver, at) {
            let outcome = session.insert_friendship(&friendship).await.unwrap();
            assert_eq!(outcome, InsertOutcome::Inserted);
        }
        for event in FriendAdded::for_acceptance(requester, receiver, at) {
            let outcome = session
                .insert_outbox_event(NewOutboxEvent {
                    saga_id,
                    idempotency_key: event.idempotency_key(saga_id),
                    event_type: event.event_type().to_string(),
                    payload: serde_json::to_value(&event).unwrap(),
                })
                .await
                .unwrap();
            assert_eq!(outcome, InsertOutcome::Inserted);
        }

        // Nothing visible until commit.
        assert_eq!(store.friendship_count().await, 0);
        assert_eq!(store.outbox_count().await, 0);

        session.commit().await.unwrap();

        assert_eq!(store.friendship_count().await, 2);
        assert_eq!(store.outbox_count().await, 2);
        assert_eq!(store.outbox_events_for_saga(saga_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn dropped_session_discards_writes() {
        let store = InMemorySocialStore::new();
        let at = Utc::now();

        let mut session = store.begin_staging().await.unwrap();
        session
            .insert_friendship(&Friendship::new(UserId::new(), UserId::new(), at))
            .await
            .unwrap();
        drop(session);

        assert_eq!(store.friendship_count().await, 0);
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_already_exists() {
        let store = InMemorySocialStore::new();
        let saga_id = SagaId::new();
        let new_event = || NewOutboxEvent {
            saga_id,
            idempotency_key: format!("{saga_id}:FriendAdded:receiver"),
            event_type: "FriendAdded".to_string(),
            payload: serde_json::json!({}),
        };

        let mut session = store.begin_staging().await.unwrap();
        assert_eq!(
            session.insert_outbox_event(new_event()).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            session.insert_outbox_event(new_event()).await.unwrap(),
            InsertOutcome::AlreadyExists
        );
        session.commit().await.unwrap();

        // A fresh session sees the committed key too.
        let mut session = store.begin_staging().await.unwrap();
        assert_eq!(
            session.insert_outbox_event(new_event()).await.unwrap(),
            InsertOutcome::AlreadyExists
        );
        drop(session);

        assert_eq!(store.outbox_count().await, 1);
    }

    #[tokio::test]
    async fn relay_lifecycle_marks_and_retries() {
        let store = InMemorySocialStore::new();
        let saga_id = SagaId::new();

        let mut session = store.begin_staging().await.unwrap();
        session
            .insert_outbox_event(NewOutboxEvent {
                saga_id,
                idempotency_key: "key-1".to_string(),
                event_type: "FriendAdded".to_string(),
                payload: serde_json::json!({}),
            })
            .await
            .unwrap();
        session.commit().await.unwrap();

        let pending = store.unprocessed_events(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        let id = pending[0].id;

        let updated = store.record_relay_failure(id, "broker down").await.unwrap();
        assert_eq!(updated.retry_count, 1);
        assert_eq!(updated.last_error.as_deref(), Some("broker down"));

        store.mark_processed(id).await.unwrap();
        assert!(store.unprocessed_events(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_unprocessed_keeps_processed_rows() {
        let store = InMemorySocialStore::new();
        let saga_id = SagaId::new();

        let mut session = store.begin_staging().await.unwrap();
        for key in ["key-1", "key-2"] {
            session
                .insert_outbox_event(NewOutboxEvent {
                    saga_id,
                    idempotency_key: key.to_string(),
                    event_type: "FriendAdded".to_string(),
                    payload: serde_json::json!({}),
                })
                .await
                .unwrap();
        }
        session.commit().await.unwrap();

        let pending = store.unprocessed_events(10).await.unwrap();
        store.mark_processed(pending[0].id).await.unwrap();

        let deleted = store.delete_unprocessed_for_saga(saga_id).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.outbox_count().await, 1);
    }

    #[tokio::test]
    async fn dead_letter_resolution() {
        let store = InMemorySocialStore::new();
        let saga_id = SagaId::new();

        let letter = store
            .insert_dead_letter(NewDeadLetterEvent {
                original_event_id: None,
                saga_id,
                saga_state: "Failed".to_string(),
                event_type: "FriendAdded".to_string(),
                payload: serde_json::json!({}),
                failure_reason: "publish failed".to_string(),
                failure_count: 5,
            })
            .await
            .unwrap();

        assert_eq!(store.unresolved_dead_letters().await.unwrap().len(), 1);

        store
            .resolve_dead_letter(letter.id, "oncall", "replayed manually")
            .await
            .unwrap();

        assert!(store.unresolved_dead_letters().await.unwrap().is_empty());
    }
}
