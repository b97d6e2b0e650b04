//! Shared types used across the chat backend crates.

pub mod types;

pub use types::{SagaId, UserId, Version};
