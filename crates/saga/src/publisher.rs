//! Event publisher seam for the outbox relay.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use storage::OutboxEvent;
use thiserror::Error;

/// Failure to hand an event to the downstream pipeline.
#[derive(Debug, Error)]
#[error("Publish failed: {0}")]
pub struct PublishError(pub String);

/// Hands staged events to the external event pipeline.
///
/// The broker client lives behind this trait; the relay only cares about
/// success or failure per event.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one staged event downstream.
    async fn publish(&self, event: &OutboxEvent) -> Result<(), PublishError>;
}

#[derive(Debug, Default)]
struct InMemoryPublisherState {
    published: Vec<OutboxEvent>,
    fail_on_publish: bool,
}

/// In-memory publisher for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPublisher {
    state: Arc<RwLock<InMemoryPublisherState>>,
}

impl InMemoryPublisher {
    /// Creates a new in-memory publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the publisher to fail every publish call.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.state.write().unwrap().fail_on_publish = fail;
    }

    /// Returns the number of successfully published events.
    pub fn published_count(&self) -> usize {
        self.state.read().unwrap().published.len()
    }

    /// Returns a copy of every published event.
    pub fn published(&self) -> Vec<OutboxEvent> {
        self.state.read().unwrap().published.clone()
    }
}

#[async_trait]
impl EventPublisher for InMemoryPublisher {
    async fn publish(&self, event: &OutboxEvent) -> Result<(), PublishError> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_publish {
            return Err(PublishError("broker unavailable".to_string()));
        }
        state.published.push(event.clone());
        Ok(())
    }
}
