//! The compensable-step contract.

use async_trait::async_trait;

use crate::context::SagaContext;

/// One reversible unit of work in the saga.
///
/// `execute` attempts the forward action. On success it must append its
/// own name to the context's executed steps and persist any snapshot or
/// output later steps need. On failure it must record the failure on the
/// context and return false — expected failure modes (domain validation,
/// concurrency conflicts, backend errors) never propagate past this
/// boundary any other way.
///
/// `compensate` is an idempotent reversal: if the data it must reverse is
/// already absent, that is success, not failure. A compensation that hits
/// a concurrency conflict retries once internally before giving up.
#[async_trait]
pub trait SagaStep: Send + Sync {
    /// Stable identifier used for ordering and logging.
    fn name(&self) -> &'static str;

    /// Attempts the forward action.
    async fn execute(&self, ctx: &mut SagaContext) -> bool;

    /// Reverses a previously successful forward action.
    async fn compensate(&self, ctx: &mut SagaContext) -> bool;
}
