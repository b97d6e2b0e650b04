//! Saga error taxonomy.

use common::{UserId, Version};
use storage::StorageError;
use thiserror::Error;

/// Errors that can occur during saga execution.
///
/// The orchestrator classifies these: `ConcurrencyConflict` is the sole
/// retryable failure, `RequestNotFound` and `StepFailed` trigger
/// compensation, and `CompensationFailed` marks the escalated path that
/// requires manual intervention.
#[derive(Debug, Error)]
pub enum SagaError {
    /// No pending request exists for the participant pair (terminal).
    #[error("No pending friend request from {requester} to {receiver}")]
    RequestNotFound { requester: UserId, receiver: UserId },

    /// An optimistic-locking update lost the race (retryable).
    #[error("Concurrency conflict: expected version {expected}, found {actual}")]
    ConcurrencyConflict { expected: Version, actual: Version },

    /// A step's forward action failed (compensable).
    #[error("Saga step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    /// A compensation action itself failed (unrecoverable).
    #[error("Compensation for step '{step}' failed: {reason}")]
    CompensationFailed { step: String, reason: String },

    /// Storage error outside the concurrency-conflict class.
    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Returns true if the orchestrator may restart the saga for this
    /// failure.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, SagaError::ConcurrencyConflict { .. })
    }
}

impl From<StorageError> for SagaError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ConcurrencyConflict { expected, actual } => {
                SagaError::ConcurrencyConflict { expected, actual }
            }
            other => SagaError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_conflict_lifts_to_saga_conflict() {
        let err: SagaError = StorageError::ConcurrencyConflict {
            expected: Version::new(1),
            actual: Version::new(2),
        }
        .into();

        assert!(err.is_concurrency_conflict());
    }

    #[test]
    fn other_storage_errors_stay_wrapped() {
        let err: SagaError = StorageError::NotFound.into();
        assert!(!err.is_concurrency_conflict());
        assert!(matches!(err, SagaError::Storage(StorageError::NotFound)));
    }
}
