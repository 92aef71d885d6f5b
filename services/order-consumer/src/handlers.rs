//! The idempotent consumer dedup gate.
//!
//! `handle_message` is the transactional dedup gate: check
//! `processed_messages`, apply the business effect, insert the dedup
//! row, all inside one transaction via
//! [`idempotent_consumer::IdempotencyGuard::process_if_new_tx`]. The
//! Kafka consume loop in `main.rs` maps the resulting
//! [`ProcessingResult`] to ack/nack.

use idempotent_consumer::{IdempotencyGuard, ProcessingResult};
use tracing::warn;

use crate::error::ConsumerError;
use crate::models::OrderCreatedPayload;

/// Apply one outbox-relayed message, tolerating redelivery.
///
/// `message_id` is the outbox row id the relay used as the broker
/// message key — the same id `processed_messages` dedups on.
pub async fn handle_message(
    guard: &IdempotencyGuard,
    message_id: &str,
    payload: &[u8],
) -> Result<ProcessingResult, ConsumerError> {
    let event: OrderCreatedPayload = serde_json::from_slice(payload)?;

    let result = guard
        .process_if_new_tx(message_id, move |tx| {
            Box::pin(async move {
                // A vanished order silently no-ops here. We log it
                // rather than erroring, since erroring would roll back
                // the dedup insert and cause this message to retry
                // forever (see DESIGN.md).
                let res = sqlx::query(
                    "UPDATE orders SET status = 'COMPLETED' WHERE id = $1 AND status != 'COMPLETED'",
                )
                .bind(event.order_id)
                .execute(&mut **tx)
                .await?;

                if res.rows_affected() == 0 {
                    warn!(order_id = %event.order_id, "OrderCreated effect applied to zero rows (already completed or missing)");
                }

                Ok(())
            })
        })
        .await?;

    if let ProcessingResult::Failed(ref msg) = result {
        return Err(ConsumerError::EffectFailed(msg.clone()));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_payload() {
        let bad = b"not json";
        let parsed: Result<OrderCreatedPayload, _> = serde_json::from_slice(bad);
        assert!(parsed.is_err());
    }

    #[test]
    fn decodes_valid_payload() {
        let body = serde_json::json!({
            "event_type": "OrderCreated",
            "order_id": uuid::Uuid::new_v4(),
            "user_id": "u1",
            "amount": 42.5,
        });
        let bytes = serde_json::to_vec(&body).unwrap();
        let parsed: OrderCreatedPayload = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.event_type, "OrderCreated");
        assert_eq!(parsed.amount, 42.5);
    }
}
