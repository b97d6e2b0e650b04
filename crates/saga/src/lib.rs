//! Saga engine for accepting friend requests.
//!
//! Accepting a request is a multi-aggregate change: the request row flips
//! to accepted, two reciprocal friendship rows appear, and the matching
//! domain events land in the transactional outbox. This crate guarantees
//! that either all three effects happen or none do:
//!
//! 1. `accept_request` — mutate the request aggregate (optimistic lock)
//! 2. `create_relationships` — insert the reciprocal friendship pair
//! 3. `stage_events` — write outbox rows and commit the shared transaction
//!
//! Concurrency conflicts restart the whole saga with a fresh context (capped
//! attempts, exponential backoff). Any other failure compensates completed
//! steps in reverse order. A compensation failure is escalated to a
//! dead-letter record plus a critical alert for manual reconciliation.

pub mod alert;
pub mod context;
pub mod error;
pub mod friend_acceptance;
pub mod orchestrator;
pub mod publisher;
pub mod relay;
pub mod result;
pub mod state;
pub mod step;
pub mod steps;

pub use alert::{CriticalAlert, CriticalAlerter, InMemoryAlerter, TracingAlerter};
pub use context::SagaContext;
pub use error::SagaError;
pub use orchestrator::{RetryPolicy, SagaOrchestrator};
pub use publisher::{EventPublisher, InMemoryPublisher, PublishError};
pub use relay::{OutboxRelay, RelayConfig, RelayReport};
pub use result::SagaResult;
pub use state::SagaState;
pub use step::SagaStep;
pub use steps::{AcceptRequestStep, CreateRelationshipsStep, StageEventsStep};
