//! Error taxonomy for the consumer binary.
//!
//! Every variant here maps directly to an ack/nack decision in
//! [`crate::handlers::handle_message`] — there is no variant that
//! escapes to a caller, because the consumer has none but the broker
//! itself.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsumerError {
    /// Kafka client/connection failure.
    #[error("Kafka error: {0}")]
    Kafka(String),

    /// Database call failed; maps to nack and requeue.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Payload failed to decode. Treated as transient (nack) rather
    /// than permanent, since a genuinely malformed payload would
    /// otherwise loop forever under at-least-once redelivery with no
    /// quarantine mechanism.
    #[error("Payload decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The idempotency guard itself failed (not a dedup hit — an
    /// actual database/transaction error surfaced by the guard).
    #[error("Idempotency guard error: {0}")]
    Idempotency(#[from] idempotent_consumer::IdempotencyError),

    /// The caller's business effect failed inside the guard's
    /// transaction; it was rolled back.
    #[error("Business effect failed: {0}")]
    EffectFailed(String),
}
