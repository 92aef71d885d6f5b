//! The Producer Transaction.
//!
//! `create_order` either commits both the `orders` row and its
//! `outbox_events` row in one transaction, or leaves the database
//! unchanged. There is no publish-then-write or write-then-publish path
//! here at all — the relay is the only thing that talks to the broker,
//! entirely out of band from this function.

use chrono::Utc;
use error_handling::ServiceError;
use sqlx::PgPool;
use transactional_outbox::{OutboxEvent, OutboxRepository, SqlxOutboxRepository};
use uuid::Uuid;

use crate::models::{CreateOrderRequest, Order};

/// Atomically persist a new order together with its `OrderCreated`
/// outbox event. On any failure before commit, the
/// transaction is rolled back and the caller sees a
/// [`ServiceError`] with no visible state change.
pub async fn create_order(
    pool: &PgPool,
    outbox: &SqlxOutboxRepository,
    request: CreateOrderRequest,
) -> Result<Order, ServiceError> {
    request
        .validate()
        .map_err(ServiceError::ValidationError)?;

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    let order = Order {
        id: Uuid::new_v4(),
        user_id: request.user_id,
        amount: request.amount,
        status: "PENDING".to_string(),
        created_at: Utc::now(),
    };

    sqlx::query(
        r#"
        INSERT INTO orders (id, user_id, amount, status, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(order.id)
    .bind(&order.user_id)
    .bind(order.amount)
    .bind(&order.status)
    .bind(order.created_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| ServiceError::Database(e.to_string()))?;

    let event = OutboxEvent {
        id: Uuid::new_v4(),
        aggregate_id: order.id,
        payload: serde_json::json!({
            "event_type": "OrderCreated",
            "order_id": order.id,
            "user_id": order.user_id,
            "amount": order.amount,
        }),
        metadata: None,
        created_at: order.created_at,
        retry_count: 0,
        last_error: None,
    };

    outbox
        .insert(&mut tx, &event)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    tx.commit()
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    tracing::info!(order_id = %order.id, event_id = %event.id, "Order created with outbox event");

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_user_id() {
        let req = CreateOrderRequest {
            user_id: "  ".to_string(),
            amount: 10.0,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_amount() {
        let req = CreateOrderRequest {
            user_id: "u1".to_string(),
            amount: 0.0,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn accepts_valid_request() {
        let req = CreateOrderRequest {
            user_id: "u1".to_string(),
            amount: 100.0,
        };
        assert!(req.validate().is_ok());
    }
}
