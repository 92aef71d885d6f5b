//! Convenience macros for enqueuing an outbox event inside a producer
//! transaction.

/// Build and insert an [`OutboxEvent`](crate::OutboxEvent) within an
/// open transaction, alongside whatever domain row the caller just wrote.
///
/// # Usage
///
/// ```rust,no_run
/// use transactional_outbox::{publish_event, SqlxOutboxRepository};
/// use sqlx::PgPool;
/// use uuid::Uuid;
/// use serde_json::json;
///
/// # async fn example(pool: PgPool, repo: SqlxOutboxRepository) -> Result<(), Box<dyn std::error::Error>> {
/// let mut tx = pool.begin().await?;
/// let order_id = Uuid::new_v4();
///
/// sqlx::query("INSERT INTO orders (id, user_id, amount, status) VALUES ($1, $2, $3, 'PENDING')")
///     .bind(order_id)
///     .bind("u1")
///     .bind(100.0_f64)
///     .execute(&mut *tx)
///     .await?;
///
/// publish_event!(
///     &mut tx,
///     &repo,
///     order_id,
///     json!({
///         "event_type": "OrderCreated",
///         "order_id": order_id,
///         "user_id": "u1",
///         "amount": 100.0,
///     })
/// );
///
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```
///
/// # Arguments
///
/// * `$tx` - Mutable reference to the open database transaction
/// * `$repo` - Reference to an [`OutboxRepository`](crate::OutboxRepository) implementation
/// * `$aggregate_id` - UUID of the domain row this event reports on
/// * `$payload` - JSON-serializable, self-describing payload (must carry `event_type`)
#[macro_export]
macro_rules! publish_event {
    ($tx:expr, $repo:expr, $aggregate_id:expr, $payload:expr) => {{
        use chrono::Utc;
        use uuid::Uuid;
        use $crate::{OutboxEvent, OutboxRepository};

        let event = OutboxEvent {
            id: Uuid::new_v4(),
            aggregate_id: $aggregate_id,
            payload: serde_json::to_value($payload)?,
            metadata: None,
            created_at: Utc::now(),
            retry_count: 0,
            last_error: None,
        };
        $repo.insert($tx, &event).await
    }};
}

#[cfg(test)]
mod tests {
    // Macro tests are compile-time checks: if this file compiles, the
    // macro is syntactically correct.
}
