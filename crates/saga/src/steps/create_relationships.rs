//! Step 2: insert the reciprocal friendship pair.

use std::sync::Arc;

use async_trait::async_trait;
use storage::{SocialStore, StagingSession, StorageError};

use crate::context::SagaContext;
use crate::error::SagaError;
use crate::friend_acceptance::STEP_CREATE_RELATIONSHIPS;
use crate::step::SagaStep;

/// Opens the staging transaction and writes both friendship rows into it.
///
/// The transaction stays open on the context: event staging must commit
/// atomically with these rows, so step 3 owns the commit.
pub struct CreateRelationshipsStep<S> {
    store: Arc<S>,
}

impl<S> CreateRelationshipsStep<S> {
    /// Creates the step over the given store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: SocialStore> SagaStep for CreateRelationshipsStep<S> {
    fn name(&self) -> &'static str {
        STEP_CREATE_RELATIONSHIPS
    }

    async fn execute(&self, ctx: &mut SagaContext) -> bool {
        let friendships = ctx.friendships().to_vec();
        if friendships.is_empty() {
            ctx.record_failure(SagaError::StepFailed {
                step: self.name().to_string(),
                reason: "no relationship pair derived".to_string(),
            });
            return false;
        }

        let mut session = match self.store.begin_staging().await {
            Ok(session) => session,
            Err(e) => {
                ctx.record_failure(e.into());
                return false;
            }
        };

        for friendship in &friendships {
            // An existing row means an earlier attempt already applied this
            // write; the insert is conflict-tolerant either way.
            if let Err(e) = session.insert_friendship(friendship).await {
                ctx.record_failure(e.into());
                return false;
            }
        }

        ctx.attach_staging(session);
        ctx.record_step(self.name());
        true
    }

    async fn compensate(&self, ctx: &mut SagaContext) -> bool {
        // Uncommitted staged writes vanish with the transaction.
        ctx.discard_staging();

        let keys = [
            (ctx.receiver_id(), ctx.requester_id()),
            (ctx.requester_id(), ctx.receiver_id()),
        ];

        for (user_id, friend_id) in keys {
            let mut deleted = false;
            for attempt in 0..2 {
                match self.store.delete_friendship(user_id, friend_id).await {
                    // Removed or already gone; both count as reverted.
                    Ok(_) => {
                        deleted = true;
                        break;
                    }
                    Err(StorageError::ConcurrencyConflict { .. }) if attempt == 0 => continue,
                    Err(e) => {
                        tracing::error!(
                            saga_id = %ctx.saga_id(),
                            %user_id,
                            %friend_id,
                            error = %e,
                            "failed to delete friendship during compensation"
                        );
                        return false;
                    }
                }
            }
            if !deleted {
                return false;
            }
        }

        true
    }
}
