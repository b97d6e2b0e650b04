//! Step 3: stage FriendAdded events and commit the shared transaction.

use std::sync::Arc;

use async_trait::async_trait;
use storage::{NewOutboxEvent, SocialStore, StagingSession};

use crate::context::SagaContext;
use crate::error::SagaError;
use crate::friend_acceptance::STEP_STAGE_EVENTS;
use crate::step::SagaStep;

/// Writes one outbox row per derived domain event, keyed by the
/// deterministic idempotency key, then commits the staging transaction so
/// the friendship rows and their events land atomically.
pub struct StageEventsStep<S> {
    store: Arc<S>,
}

impl<S> StageEventsStep<S> {
    /// Creates the step over the given store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: SocialStore> SagaStep for StageEventsStep<S> {
    fn name(&self) -> &'static str {
        STEP_STAGE_EVENTS
    }

    async fn execute(&self, ctx: &mut SagaContext) -> bool {
        let saga_id = ctx.saga_id();
        let events = ctx.events().to_vec();
        if events.is_empty() {
            ctx.record_failure(SagaError::StepFailed {
                step: self.name().to_string(),
                reason: "no domain events derived".to_string(),
            });
            return false;
        }

        let Some(mut session) = ctx.take_staging() else {
            ctx.record_failure(SagaError::StepFailed {
                step: self.name().to_string(),
                reason: "no staging transaction open".to_string(),
            });
            return false;
        };

        for event in &events {
            let payload = match serde_json::to_value(event) {
                Ok(payload) => payload,
                Err(e) => {
                    ctx.record_failure(SagaError::Serialization(e));
                    return false;
                }
            };

            // The unique constraint on the key is the source of truth: a
            // row staged by a concurrent or earlier attempt is success.
            let staged = NewOutboxEvent {
                saga_id,
                idempotency_key: event.idempotency_key(saga_id),
                event_type: event.event_type().to_string(),
                payload,
            };
            if let Err(e) = session.insert_outbox_event(staged).await {
                ctx.record_failure(e.into());
                return false;
            }
        }

        match session.commit().await {
            Ok(()) => {
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
        ctx.discard_staging();

        match self
            .store
            .delete_unprocessed_for_saga(ctx.saga_id())
            .await
        {
            Ok(removed) => {
                if removed > 0 {
                    tracing::debug!(
                        saga_id = %ctx.saga_id(),
                        removed,
                        "removed staged outbox events"
                    );
                }
                true
            }
            Err(e) => {
                tracing::error!(
                    saga_id = %ctx.saga_id(),
                    error = %e,
                    "failed to delete staged outbox events during compensation"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::friend_acceptance::STEP_CREATE_RELATIONSHIPS;
    use crate::steps::CreateRelationshipsStep;
    use chrono::Utc;
    use common::{SagaId, UserId};
    use domain::{FriendAdded, Friendship};
    use storage::InMemorySocialStore;

    fn staged_context() -> SagaContext {
        let requester = UserId::new();
        let receiver = UserId::new();
        let at = Utc::now();
        let mut ctx = SagaContext::new(SagaId::new(), requester, receiver);
        ctx.set_produced(
            Friendship::reciprocal_pair(requester, receiver, at).to_vec(),
            FriendAdded::for_acceptance(requester, receiver, at).to_vec(),
        );
        ctx
    }

    async fn run_step_two(store: &Arc<InMemorySocialStore>, ctx: &mut SagaContext) {
        let step = CreateRelationshipsStep::new(store.clone());
        assert!(step.execute(ctx).await);
    }

    #[tokio::test]
    async fn execute_commits_events_with_friendships() {
        let store = Arc::new(InMemorySocialStore::new());
        let mut ctx = staged_context();
        run_step_two(&store, &mut ctx).await;

        let step = StageEventsStep::new(store.clone());
        assert!(step.execute(&mut ctx).await);

        assert_eq!(
            ctx.executed_steps(),
            &[STEP_CREATE_RELATIONSHIPS, STEP_STAGE_EVENTS]
        );
        assert!(!ctx.has_staging());
        assert_eq!(store.friendship_count().await, 2);

        let events = store.outbox_events_for_saga(ctx.saga_id()).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.event_type == "FriendAdded"));
        assert!(events.iter().all(|e| !e.processed));
    }

    #[tokio::test]
    async fn execute_without_open_transaction_fails() {
        let store = Arc::new(InMemorySocialStore::new());
        let step = StageEventsStep::new(store);
        let mut ctx = staged_context();

        assert!(!step.execute(&mut ctx).await);
        assert!(matches!(ctx.failure(), Some(SagaError::StepFailed { .. })));
    }

    #[tokio::test]
    async fn failed_commit_rolls_back_both_effects() {
        let store = Arc::new(InMemorySocialStore::new());
        let mut ctx = staged_context();
        run_step_two(&store, &mut ctx).await;
        store.set_fail_on_staging_commit(true).await;

        let step = StageEventsStep::new(store.clone());
        assert!(!step.execute(&mut ctx).await);

        assert!(matches!(ctx.failure(), Some(SagaError::Storage(_))));
        assert_eq!(store.friendship_count().await, 0);
        assert_eq!(store.outbox_count().await, 0);
    }

    #[tokio::test]
    async fn restaging_same_saga_never_duplicates_rows() {
        let store = Arc::new(InMemorySocialStore::new());
        let mut ctx = staged_context();
        run_step_two(&store, &mut ctx).await;

        let step = StageEventsStep::new(store.clone());
        assert!(step.execute(&mut ctx).await);

        // Re-run both staging steps with the same saga id, as after a
        // crash between attempts.
        run_step_two(&store, &mut ctx).await;
        assert!(step.execute(&mut ctx).await);

        assert_eq!(store.friendship_count().await, 2);
        assert_eq!(
            store.outbox_events_for_saga(ctx.saga_id()).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn compensate_removes_unprocessed_rows() {
        let store = Arc::new(InMemorySocialStore::new());
        let mut ctx = staged_context();
        run_step_two(&store, &mut ctx).await;

        let step = StageEventsStep::new(store.clone());
        assert!(step.execute(&mut ctx).await);
        assert_eq!(store.outbox_count().await, 2);

        assert!(step.compensate(&mut ctx).await);
        assert_eq!(store.outbox_count().await, 0);

        // Idempotent: nothing left to delete.
        assert!(step.compensate(&mut ctx).await);
    }
}
