//! Per-invocation saga state.

use common::{SagaId, UserId};
use domain::{FriendAdded, Friendship, RequestSnapshot};
use storage::StagingSession;

use crate::error::SagaError;

/// Mutable state carried through one saga attempt.
///
/// Steps write their snapshot and produced aggregates here, append their
/// name on success, and record their failure otherwise. `executed_steps`
/// always reflects exactly the steps that succeeded and have not yet been
/// compensated — the orchestrator compensates that list in strict reverse
/// order, removing each entry as its compensation succeeds.
///
/// The context also carries the open staging transaction shared by the
/// relationship and outbox steps; dropping the context rolls it back.
pub struct SagaContext {
    saga_id: SagaId,
    requester_id: UserId,
    receiver_id: UserId,
    snapshot: Option<RequestSnapshot>,
    friendships: Vec<Friendship>,
    events: Vec<FriendAdded>,
    executed_steps: Vec<String>,
    failure: Option<SagaError>,
    staging: Option<Box<dyn StagingSession>>,
}

impl SagaContext {
    /// Creates a fresh context for one saga attempt.
    pub fn new(saga_id: SagaId, requester_id: UserId, receiver_id: UserId) -> Self {
        Self {
            saga_id,
            requester_id,
            receiver_id,
            snapshot: None,
            friendships: Vec::new(),
            events: Vec::new(),
            executed_steps: Vec::new(),
            failure: None,
            staging: None,
        }
    }

    pub fn saga_id(&self) -> SagaId {
        self.saga_id
    }

    pub fn requester_id(&self) -> UserId {
        self.requester_id
    }

    pub fn receiver_id(&self) -> UserId {
        self.receiver_id
    }

    /// Returns the pre-acceptance snapshot, if step 1 captured one.
    pub fn snapshot(&self) -> Option<&RequestSnapshot> {
        self.snapshot.as_ref()
    }

    /// Captures the pre-acceptance request fields for compensation.
    pub fn set_snapshot(&mut self, snapshot: RequestSnapshot) {
        self.snapshot = Some(snapshot);
    }

    /// Stores the aggregates and events derived by the accept step.
    /// Written once; later steps only read them.
    pub fn set_produced(&mut self, friendships: Vec<Friendship>, events: Vec<FriendAdded>) {
        self.friendships = friendships;
        self.events = events;
    }

    /// The reciprocal friendship pair derived from the acceptance.
    pub fn friendships(&self) -> &[Friendship] {
        &self.friendships
    }

    /// The domain events to stage into the outbox.
    pub fn events(&self) -> &[FriendAdded] {
        &self.events
    }

    /// Appends a step name after its forward action succeeded.
    pub fn record_step(&mut self, name: &str) {
        self.executed_steps.push(name.to_string());
    }

    /// Steps that succeeded and have not been compensated, in execution
    /// order.
    pub fn executed_steps(&self) -> &[String] {
        &self.executed_steps
    }

    /// Removes a step name after its compensation succeeded.
    pub fn mark_compensated(&mut self, name: &str) {
        if let Some(pos) = self.executed_steps.iter().rposition(|s| s == name) {
            self.executed_steps.remove(pos);
        }
    }

    /// Records a step failure for the orchestrator to classify.
    pub fn record_failure(&mut self, failure: SagaError) {
        self.failure = Some(failure);
    }

    /// Returns the recorded failure, if any.
    pub fn failure(&self) -> Option<&SagaError> {
        self.failure.as_ref()
    }

    /// Takes the recorded failure, leaving the context clean.
    pub fn take_failure(&mut self) -> Option<SagaError> {
        self.failure.take()
    }

    /// Parks the open staging transaction for the next step.
    pub fn attach_staging(&mut self, session: Box<dyn StagingSession>) {
        self.staging = Some(session);
    }

    /// Takes the open staging transaction, if any.
    pub fn take_staging(&mut self) -> Option<Box<dyn StagingSession>> {
        self.staging.take()
    }

    /// Drops the open staging transaction, rolling its writes back.
    pub fn discard_staging(&mut self) {
        self.staging = None;
    }

    /// Returns true if a staging transaction is open.
    pub fn has_staging(&self) -> bool {
        self.staging.is_some()
    }
}

impl std::fmt::Debug for SagaContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaContext")
            .field("saga_id", &self.saga_id)
            .field("requester_id", &self.requester_id)
            .field("receiver_id", &self.receiver_id)
            .field("snapshot", &self.snapshot)
            .field("executed_steps", &self.executed_steps)
            .field("failure", &self.failure)
            .field("staging_open", &self.staging.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Version;

    fn new_context() -> SagaContext {
        SagaContext::new(SagaId::new(), UserId::new(), UserId::new())
    }

    #[test]
    fn executed_steps_append_in_order() {
        let mut ctx = new_context();
        ctx.record_step("accept_request");
        ctx.record_step("create_relationships");

        assert_eq!(
            ctx.executed_steps(),
            &["accept_request", "create_relationships"]
        );
    }

    #[test]
    fn mark_compensated_removes_entry() {
        let mut ctx = new_context();
        ctx.record_step("accept_request");
        ctx.record_step("create_relationships");

        ctx.mark_compensated("create_relationships");
        assert_eq!(ctx.executed_steps(), &["accept_request"]);

        ctx.mark_compensated("accept_request");
        assert!(ctx.executed_steps().is_empty());

        // Compensating an already-removed step is a no-op.
        ctx.mark_compensated("accept_request");
        assert!(ctx.executed_steps().is_empty());
    }

    #[test]
    fn take_failure_clears_the_context() {
        let mut ctx = new_context();
        ctx.record_failure(SagaError::ConcurrencyConflict {
            expected: Version::new(1),
            actual: Version::new(2),
        });

        assert!(ctx.failure().is_some());
        let failure = ctx.take_failure().unwrap();
        assert!(failure.is_concurrency_conflict());
        assert!(ctx.failure().is_none());
    }
}
