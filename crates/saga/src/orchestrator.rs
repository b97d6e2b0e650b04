//! Saga orchestration: drive forward, retry on conflicts, compensate
//! backward, escalate what cannot be reversed.

use std::sync::Arc;
use std::time::Duration;

use common::{SagaId, UserId};
use storage::{NewDeadLetterEvent, SocialStore};

use crate::alert::{CriticalAlert, CriticalAlerter};
use crate::context::SagaContext;
use crate::error::SagaError;
use crate::friend_acceptance;
use crate::result::SagaResult;
use crate::state::SagaState;
use crate::step::SagaStep;
use crate::steps::{AcceptRequestStep, CreateRelationshipsStep, StageEventsStep};

/// Retry policy for concurrency conflicts.
///
/// Conflicts are assumed transient and self-healing: the whole saga
/// restarts from step 1 with a fresh context, serialized, with exponential
/// backoff between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum saga attempts, the first one included.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles per attempt.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff to sleep after the given (1-based) failed attempt.
    fn delay_for(&self, attempt: u32) -> Duration {
        let doubled = self
            .base_delay
            .saturating_mul(1u32 << (attempt - 1).min(16));
        doubled.min(self.max_delay)
    }
}

/// Orchestrates the friend-acceptance saga.
///
/// Runs the fixed step list in order. A concurrency conflict discards the
/// context (rolling back any open staging transaction) and restarts the
/// whole saga, up to the configured attempt cap. Any other failure
/// compensates the executed steps in strict reverse order. A compensation
/// failure is serialized into a dead-letter record and raised through the
/// critical alerter — that path is a data-inconsistency risk and is never
/// silently swallowed.
pub struct SagaOrchestrator<S: SocialStore> {
    store: Arc<S>,
    steps: Vec<Box<dyn SagaStep>>,
    alerter: Arc<dyn CriticalAlerter>,
    retry: RetryPolicy,
}

impl<S: SocialStore + 'static> SagaOrchestrator<S> {
    /// Creates the orchestrator with the standard three-step list.
    pub fn new(store: Arc<S>, alerter: Arc<dyn CriticalAlerter>) -> Self {
        let steps: Vec<Box<dyn SagaStep>> = vec![
            Box::new(AcceptRequestStep::new(store.clone())),
            Box::new(CreateRelationshipsStep::new(store.clone())),
            Box::new(StageEventsStep::new(store.clone())),
        ];
        Self::with_steps(store, steps, alerter, RetryPolicy::default())
    }

    /// Creates the orchestrator over an explicit step list and retry
    /// policy. Ordering of the list is load-bearing: compensation runs in
    /// its exact reverse.
    pub fn with_steps(
        store: Arc<S>,
        steps: Vec<Box<dyn SagaStep>>,
        alerter: Arc<dyn CriticalAlerter>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            steps,
            alerter,
            retry,
        }
    }

    /// Returns the active retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Executes the friend-acceptance saga for the given participants.
    ///
    /// Never returns a raw error: every outcome, including escalated
    /// compensation failures, is reported through the [`SagaResult`].
    #[tracing::instrument(skip(self), fields(saga_type = friend_acceptance::SAGA_TYPE))]
    pub async fn accept_friend_request(
        &self,
        requester_id: UserId,
        receiver_id: UserId,
    ) -> SagaResult {
        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = std::time::Instant::now();
        let saga_id = SagaId::new();

        let mut attempt = 1;
        let result = loop {
            let mut ctx = SagaContext::new(saga_id, requester_id, receiver_id);

            let Some(failed_step) = self.run_steps(&mut ctx, attempt).await else {
                metrics::counter!("saga_completed").increment(1);
                tracing::info!(%saga_id, attempt, "saga completed");
                break SagaResult::completed(&ctx);
            };

            let failure = ctx.take_failure().unwrap_or_else(|| SagaError::StepFailed {
                step: failed_step.to_string(),
                reason: "step failed without recording an error".to_string(),
            });

            if failure.is_concurrency_conflict() {
                if attempt < self.retry.max_attempts {
                    metrics::counter!("saga_retries_total").increment(1);
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        %saga_id,
                        attempt,
                        step = failed_step,
                        delay_ms = delay.as_millis() as u64,
                        "concurrency conflict, restarting saga"
                    );
                    // The discarded context drops any open staging
                    // transaction, rolling this attempt's staged writes
                    // back before the next attempt starts.
                    drop(ctx);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }

                metrics::counter!("saga_failed").increment(1);
                tracing::warn!(%saga_id, attempts = attempt, "saga retry budget exhausted");
                break SagaResult::failed(saga_id, failure, ctx.executed_steps().to_vec());
            }

            break self.compensate(ctx, failed_step, failure).await;
        };

        metrics::histogram!("saga_duration_seconds").record(saga_start.elapsed().as_secs_f64());
        result
    }

    /// Runs the step list in order; returns the name of the first step
    /// that failed, or None when all succeeded.
    async fn run_steps(&self, ctx: &mut SagaContext, attempt: u32) -> Option<&'static str> {
        for step in &self.steps {
            tracing::info!(
                saga_id = %ctx.saga_id(),
                step = step.name(),
                attempt,
                "saga step started"
            );
            if !step.execute(ctx).await {
                tracing::warn!(
                    saga_id = %ctx.saga_id(),
                    step = step.name(),
                    "saga step failed"
                );
                return Some(step.name());
            }
        }
        None
    }

    /// Compensates executed steps in strict reverse order.
    #[tracing::instrument(skip(self, ctx, failure), fields(saga_id = %ctx.saga_id()))]
    async fn compensate(
        &self,
        mut ctx: SagaContext,
        failed_step: &str,
        failure: SagaError,
    ) -> SagaResult {
        // Nothing succeeded, nothing to reverse: fail immediately.
        if ctx.executed_steps().is_empty() {
            metrics::counter!("saga_failed").increment(1);
            tracing::warn!(error = %failure, "saga failed before any step completed");
            return SagaResult::failed(ctx.saga_id(), failure, Vec::new());
        }

        tracing::warn!(
            state = %SagaState::Compensating,
            failed_step,
            error = %failure,
            "compensating saga"
        );

        let executed = ctx.executed_steps().to_vec();
        for name in executed.iter().rev() {
            let Some(step) = self.steps.iter().find(|s| s.name() == name.as_str()) else {
                continue;
            };

            tracing::info!(step = name.as_str(), "compensation step started");
            if step.compensate(&mut ctx).await {
                ctx.mark_compensated(name);
            } else {
                self.escalate(&ctx, name, &failure).await;
                metrics::counter!("saga_failed").increment(1);
                return SagaResult {
                    saga_id: ctx.saga_id(),
                    state: SagaState::Failed,
                    error: Some(SagaError::CompensationFailed {
                        step: name.clone(),
                        reason: failure.to_string(),
                    }),
                    executed_steps: executed,
                    friendships: Vec::new(),
                };
            }
        }

        metrics::counter!("saga_compensated").increment(1);
        tracing::warn!(error = %failure, "saga compensated");
        SagaResult {
            saga_id: ctx.saga_id(),
            state: SagaState::Compensated,
            error: Some(failure),
            executed_steps: executed,
            friendships: Vec::new(),
        }
    }

    /// Records the stuck saga durably and raises the critical alert.
    async fn escalate(&self, ctx: &SagaContext, step: &str, failure: &SagaError) {
        let payload = serde_json::json!({
            "saga_id": ctx.saga_id(),
            "requester_id": ctx.requester_id(),
            "receiver_id": ctx.receiver_id(),
            "failed_compensation_step": step,
            "uncompensated_steps": ctx.executed_steps(),
            "snapshot": ctx.snapshot(),
            "failure": failure.to_string(),
        });

        let dead_letter = NewDeadLetterEvent {
            original_event_id: None,
            saga_id: ctx.saga_id(),
            saga_state: SagaState::Failed.as_str().to_string(),
            event_type: "SagaCompensationFailed".to_string(),
            payload,
            failure_reason: format!("compensation for step '{step}' failed: {failure}"),
            failure_count: 1,
        };

        if let Err(e) = self.store.insert_dead_letter(dead_letter).await {
            // The alert and this log line are the last durable trace of
            // the inconsistency.
            tracing::error!(
                saga_id = %ctx.saga_id(),
                error = %e,
                "failed to record saga dead letter"
            );
        }

        let alert = CriticalAlert {
            saga_id: ctx.saga_id(),
            step: step.to_string(),
            requester_id: ctx.requester_id(),
            receiver_id: ctx.receiver_id(),
            reason: failure.to_string(),
        };
        self.alerter.send_critical_alert(&alert).await;

        metrics::counter!("saga_escalations_total").increment(1);
        tracing::error!(
            saga_id = %ctx.saga_id(),
            step,
            "saga compensation failed, manual intervention required"
        );
    }
}
