//! Payload shapes the consumer decodes out of the outbox's opaque
//! bytes. Payload opacity: the relay never sees this
//! type, only the producer and the consumer agree on its shape.

use serde::{Deserialize, Serialize};

/// `OrderCreated` event body, as serialized by `order-api`'s producer
/// transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedPayload {
    pub event_type: String,
    pub order_id: uuid::Uuid,
    pub user_id: String,
    pub amount: f64,
}
