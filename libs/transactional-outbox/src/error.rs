//! Error types for the transactional outbox library.

use thiserror::Error;

/// Result type alias for outbox operations.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Errors that can occur during outbox operations.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database operation failed
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// Failed to publish event to message broker
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Generic error with context. Covers malformed payloads (at
    /// minimum a missing `routing_hint`/`event_type` field) — the row
    /// is left PENDING rather than quarantined.
    #[error("Outbox error: {0}")]
    Other(#[from] anyhow::Error),
}
