//! Concrete steps of the friend-acceptance saga, in execution order.

pub mod accept_request;
pub mod create_relationships;
pub mod stage_events;

pub use accept_request::AcceptRequestStep;
pub use create_relationships::CreateRelationshipsStep;
pub use stage_events::StageEventsStep;
