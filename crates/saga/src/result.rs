//! Terminal outcome of a saga invocation.

use common::SagaId;
use domain::Friendship;

use crate::context::SagaContext;
use crate::error::SagaError;
use crate::state::SagaState;

/// What the caller gets back from a saga invocation.
///
/// `friendships` carries the created relationship pair on completion, so
/// callers can build user-facing responses without a follow-up read.
/// `executed_steps` records the steps that succeeded during the final
/// attempt, before any compensation.
#[derive(Debug)]
pub struct SagaResult {
    pub saga_id: SagaId,
    pub state: SagaState,
    pub error: Option<SagaError>,
    pub executed_steps: Vec<String>,
    pub friendships: Vec<Friendship>,
}

impl SagaResult {
    /// Builds the completed result from a fully executed context.
    pub(crate) fn completed(ctx: &SagaContext) -> Self {
        Self {
            saga_id: ctx.saga_id(),
            state: SagaState::Completed,
            error: None,
            executed_steps: ctx.executed_steps().to_vec(),
            friendships: ctx.friendships().to_vec(),
        }
    }

    /// Builds a terminal failed result with no surviving effects.
    pub(crate) fn failed(saga_id: SagaId, error: SagaError, executed_steps: Vec<String>) -> Self {
        Self {
            saga_id,
            state: SagaState::Failed,
            error: Some(error),
            executed_steps,
            friendships: Vec::new(),
        }
    }

    /// Returns true if every step succeeded.
    pub fn is_completed(&self) -> bool {
        self.state == SagaState::Completed
    }
}
