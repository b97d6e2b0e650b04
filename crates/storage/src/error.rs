use common::Version;
use thiserror::Error;

/// Errors that can occur when interacting with the relational store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The targeted record does not exist.
    #[error("Record not found")]
    NotFound,

    /// The record already exists (unique or primary-key violation on a
    /// plain insert).
    #[error("Record already exists")]
    AlreadyExists,

    /// An optimistic-locking update was rejected because the record's
    /// version changed since it was read.
    #[error("Concurrency conflict: expected version {expected}, found {actual}")]
    ConcurrencyConflict { expected: Version, actual: Version },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StorageError>;
