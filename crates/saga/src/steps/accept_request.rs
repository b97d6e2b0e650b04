//! Step 1: transition the pending request to accepted.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use domain::{FriendAdded, Friendship};
use storage::{SocialStore, StorageError};

use crate::context::SagaContext;
use crate::error::SagaError;
use crate::friend_acceptance::STEP_ACCEPT_REQUEST;
use crate::step::SagaStep;

/// Mutates the request aggregate under its optimistic lock and derives the
/// friendship pair plus domain events the later steps persist.
pub struct AcceptRequestStep<S> {
    store: Arc<S>,
}

impl<S> AcceptRequestStep<S> {
    /// Creates the step over the given store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: SocialStore> SagaStep for AcceptRequestStep<S> {
    fn name(&self) -> &'static str {
        STEP_ACCEPT_REQUEST
    }

    async fn execute(&self, ctx: &mut SagaContext) -> bool {
        let request = match self
            .store
            .find_pending_request(ctx.requester_id(), ctx.receiver_id())
            .await
        {
            Ok(Some(request)) => request,
            Ok(None) => {
                ctx.record_failure(SagaError::RequestNotFound {
                    requester: ctx.requester_id(),
                    receiver: ctx.receiver_id(),
                });
                return false;
            }
            Err(e) => {
                ctx.record_failure(e.into());
                return false;
            }
        };

        ctx.set_snapshot(request.snapshot());

        let expected_version = request.version();
        let accepted_at = Utc::now();
        let mut accepted = request;
        if let Err(e) = accepted.accept(accepted_at) {
            ctx.record_failure(SagaError::StepFailed {
                step: self.name().to_string(),
                reason: e.to_string(),
            });
            return false;
        }

        let friendships =
            Friendship::reciprocal_pair(ctx.requester_id(), ctx.receiver_id(), accepted_at);
        let events =
            FriendAdded::for_acceptance(ctx.requester_id(), ctx.receiver_id(), accepted_at);

        match self.store.update_request(&accepted, expected_version).await {
            Ok(_) => {
                ctx.set_produced(friendships.to_vec(), events.to_vec());
                ctx.record_step(self.name());
                true
            }
            Err(e) => {
                ctx.record_failure(e.into());
                false
            }
        }
    }

    async fn compensate(&self, ctx: &mut SagaContext) -> bool {
        let Some(snapshot) = ctx.snapshot().cloned() else {
            return true;
        };

        for attempt in 0..2 {
            // Restore onto the current row, never the stale in-memory copy.
            let current = match self
                .store
                .find_request(ctx.requester_id(), ctx.receiver_id())
                .await
            {
                Ok(Some(request)) => request,
                // The row is gone: nothing left to revert.
                Ok(None) => return true,
                Err(e) => {
                    tracing::error!(
                        saga_id = %ctx.saga_id(),
                        error = %e,
                        "failed to load request for compensation"
                    );
                    return false;
                }
            };

            if current.status() == snapshot.status
                && current.responded_at() == snapshot.responded_at
            {
                return true;
            }

            let expected_version = current.version();
            let mut restored = current;
            restored.restore(&snapshot);

            match self.store.update_request(&restored, expected_version).await {
                Ok(_) => return true,
                Err(StorageError::NotFound) => return true,
                Err(StorageError::ConcurrencyConflict { .. }) if attempt == 0 => continue,
                Err(e) => {
                    tracing::error!(
                        saga_id = %ctx.saga_id(),
                        error = %e,
                        "failed to restore request during compensation"
                    );
                    return false;
                }
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{SagaId, UserId, Version};
    use domain::{FriendRequest, RequestStatus};
    use storage::InMemorySocialStore;

    async fn seed_pending(store: &InMemorySocialStore) -> (UserId, UserId) {
        let request = FriendRequest::new(UserId::new(), UserId::new()).unwrap();
        let key = (request.requester_id(), request.receiver_id());
        store.insert_request(&request).await.unwrap();
        key
    }

    fn context_for(pair: (UserId, UserId)) -> SagaContext {
        SagaContext::new(SagaId::new(), pair.0, pair.1)
    }

    #[tokio::test]
    async fn execute_accepts_and_derives() {
        let store = Arc::new(InMemorySocialStore::new());
        let pair = seed_pending(&store).await;
        let step = AcceptRequestStep::new(store.clone());
        let mut ctx = context_for(pair);

        assert!(step.execute(&mut ctx).await);

        assert_eq!(ctx.executed_steps(), &[STEP_ACCEPT_REQUEST]);
        assert_eq!(ctx.friendships().len(), 2);
        assert_eq!(ctx.events().len(), 2);
        assert_eq!(ctx.snapshot().unwrap().status, RequestStatus::Pending);

        let stored = store.find_request(pair.0, pair.1).await.unwrap().unwrap();
        assert_eq!(stored.status(), RequestStatus::Accepted);
        assert_eq!(stored.version(), Version::new(2));
    }

    #[tokio::test]
    async fn execute_fails_terminally_when_no_pending_request() {
        let store = Arc::new(InMemorySocialStore::new());
        let step = AcceptRequestStep::new(store);
        let mut ctx = context_for((UserId::new(), UserId::new()));

        assert!(!step.execute(&mut ctx).await);
        assert!(matches!(
            ctx.failure(),
            Some(SagaError::RequestNotFound { .. })
        ));
        assert!(ctx.executed_steps().is_empty());
    }

    #[tokio::test]
    async fn execute_records_conflict_for_retry() {
        let store = Arc::new(InMemorySocialStore::new());
        let pair = seed_pending(&store).await;
        store.set_conflicts_on_update(1).await;

        let step = AcceptRequestStep::new(store.clone());
        let mut ctx = context_for(pair);

        assert!(!step.execute(&mut ctx).await);
        assert!(ctx.failure().unwrap().is_concurrency_conflict());

        // The row is untouched.
        let stored = store
            .find_pending_request(pair.0, pair.1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status(), RequestStatus::Pending);
    }

    #[tokio::test]
    async fn compensate_restores_snapshot() {
        let store = Arc::new(InMemorySocialStore::new());
        let pair = seed_pending(&store).await;
        let step = AcceptRequestStep::new(store.clone());
        let mut ctx = context_for(pair);

        assert!(step.execute(&mut ctx).await);
        assert!(step.compensate(&mut ctx).await);

        let stored = store.find_request(pair.0, pair.1).await.unwrap().unwrap();
        assert_eq!(stored.status(), RequestStatus::Pending);
        assert!(stored.responded_at().is_none());
    }

    #[tokio::test]
    async fn compensate_twice_is_idempotent() {
        let store = Arc::new(InMemorySocialStore::new());
        let pair = seed_pending(&store).await;
        let step = AcceptRequestStep::new(store.clone());
        let mut ctx = context_for(pair);

        assert!(step.execute(&mut ctx).await);
        assert!(step.compensate(&mut ctx).await);
        assert!(step.compensate(&mut ctx).await);

        let stored = store.find_request(pair.0, pair.1).await.unwrap().unwrap();
        assert_eq!(stored.status(), RequestStatus::Pending);
    }

    #[tokio::test]
    async fn compensate_without_snapshot_is_noop_success() {
        let store = Arc::new(InMemorySocialStore::new());
        let step = AcceptRequestStep::new(store);
        let mut ctx = context_for((UserId::new(), UserId::new()));

        assert!(step.compensate(&mut ctx).await);
    }

    #[tokio::test]
    async fn compensate_retries_once_on_conflict() {
        let store = Arc::new(InMemorySocialStore::new());
        let pair = seed_pending(&store).await;
        let step = AcceptRequestStep::new(store.clone());
        let mut ctx = context_for(pair);

        assert!(step.execute(&mut ctx).await);
        let calls_before = store.update_call_count().await;

        store.set_conflicts_on_update(1).await;
        assert!(step.compensate(&mut ctx).await);

        // One conflicted attempt plus the retried restore.
        assert_eq!(store.update_call_count().await, calls_before + 2);
        let stored = store.find_request(pair.0, pair.1).await.unwrap().unwrap();
        assert_eq!(stored.status(), RequestStatus::Pending);
    }
}
