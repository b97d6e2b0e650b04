//! Outbox relay: drains staged events into the event pipeline.

use std::sync::Arc;

use storage::{NewDeadLetterEvent, SocialStore, StorageError};

use crate::publisher::EventPublisher;
use crate::state::SagaState;

/// Relay tuning knobs.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximum rows drained per pass.
    pub batch_size: u32,
    /// Retry ceiling: once a row's retry count reaches this, it is moved
    /// to the dead-letter table.
    pub max_retries: i32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_retries: 5,
        }
    }
}

/// Outcome of one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub published: u32,
    pub failed: u32,
    pub dead_lettered: u32,
}

/// Drains unprocessed outbox rows, oldest first.
///
/// Each successful publish marks the row processed. Each failure
/// increments the row's retry count; once the count reaches the ceiling,
/// the row is copied into the dead-letter table and removed from active
/// processing. The relay runs when its owner calls [`drain_once`] — it
/// spawns nothing itself.
///
/// [`drain_once`]: OutboxRelay::drain_once
pub struct OutboxRelay<S, P> {
    store: Arc<S>,
    publisher: P,
    config: RelayConfig,
}

impl<S: SocialStore, P: EventPublisher> OutboxRelay<S, P> {
    /// Creates a relay with the default configuration.
    pub fn new(store: Arc<S>, publisher: P) -> Self {
        Self::with_config(store, publisher, RelayConfig::default())
    }

    /// Creates a relay with an explicit configuration.
    pub fn with_config(store: Arc<S>, publisher: P, config: RelayConfig) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    /// Drains one batch of unprocessed events.
    #[tracing::instrument(skip(self))]
    pub async fn drain_once(&self) -> Result<RelayReport, StorageError> {
        let pending = self
            .store
            .unprocessed_events(self.config.batch_size)
            .await?;

        let mut report = RelayReport::default();
        for event in pending {
            match self.publisher.publish(&event).await {
                Ok(()) => {
                    self.store.mark_processed(event.id).await?;
                    metrics::counter!("outbox_relay_published").increment(1);
                    report.published += 1;
                }
                Err(e) => {
                    let updated = self
                        .store
                        .record_relay_failure(event.id, &e.to_string())
                        .await?;

                    if updated.retry_count >= self.config.max_retries {
                        self.store
                            .insert_dead_letter(NewDeadLetterEvent {
                                original_event_id: Some(updated.id),
                                saga_id: updated.saga_id,
                                saga_state: SagaState::Completed.as_str().to_string(),
                                event_type: updated.event_type.clone(),
                                payload: updated.payload.clone(),
                                failure_reason: format!("relay retries exhausted: {e}"),
                                failure_count: updated.retry_count,
                            })
                            .await?;
                        self.store.remove_outbox_event(updated.id).await?;

                        metrics::counter!("outbox_relay_dead_lettered").increment(1);
                        tracing::error!(
                            event_id = %updated.id,
                            saga_id = %updated.saga_id,
                            retry_count = updated.retry_count,
                            "outbox event dead-lettered"
                        );
                        report.dead_lettered += 1;
                    } else {
                        tracing::warn!(
                            event_id = %updated.id,
                            retry_count = updated.retry_count,
                            error = %e,
                            "outbox publish failed, will retry"
                        );
                        report.failed += 1;
                    }
                }
            }
        }

        Ok(report)
    }
}
