//! # Idempotent consumer dedup gate
//!
//! Gives Kafka consumers exactly-once *effect* semantics using PostgreSQL
//! as persistent idempotency tracking storage, so a redelivered message is
//! absorbed rather than reapplied across restarts, rebalances, or at
//! least-once broker delivery.
//!
//! ## Problem
//!
//! Without persistent idempotency tracking:
//! - **Service restarts**: an in-memory dedup set is lost, messages reprocessed.
//! - **Rebalances**: a new consumer instance reprocesses the same message.
//! - **At-least-once delivery**: duplicates cause duplicate business effects.
//!
//! ## Solution
//!
//! Track processed message ids in `processed_messages`:
//! - **Atomic check-and-process**: [`IdempotencyGuard::process_if_new_tx`]
//!   runs the dedup check, the caller's business effect, and the dedup
//!   insert in one database transaction, so the two either commit together
//!   or neither does.
//! - **Fast lookups**: unique index on `message_id`.
//! - **Configurable retention**: old rows are periodically purged.
//!
//! ## Architecture
//!
//! ```text
//! Broker → Consumer → IdempotencyGuard → business effect → processed_messages
//!                           |
//!                      (check / insert, same transaction)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use idempotent_consumer::{IdempotencyGuard, ProcessingResult};
//! use sqlx::PgPool;
//! use std::time::Duration;
//!
//! # async fn example(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let guard = IdempotencyGuard::new(pool, Duration::from_secs(7 * 86400));
//!
//! let result = guard.process_if_new_tx("m-1", |tx| Box::pin(async move {
//!     sqlx::query("UPDATE orders SET status = 'COMPLETED' WHERE id = $1")
//!         .bind("o1")
//!         .execute(&mut **tx)
//!         .await?;
//!     Ok(())
//! })).await?;
//!
//! match result {
//!     ProcessingResult::Success => println!("applied"),
//!     ProcessingResult::AlreadyProcessed => println!("duplicate, skipped"),
//!     ProcessingResult::Failed(msg) => eprintln!("processing failed: {msg}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency safety
//!
//! Two workers racing on the same message id: whichever transaction commits
//! its `INSERT INTO processed_messages` first wins. The loser either sees
//! the row already present on its own check (serialized behind the
//! winner's commit) and returns `AlreadyProcessed`, or hits the unique
//! constraint on insert if the two checks ran concurrently — the insert
//! conflict is treated as "skip duplicate", not an error, per the tie-break
//! rule in the contract this gate implements.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, warn};

mod error;

pub use error::{IdempotencyError, IdempotencyResult};

/// Result of processing a message with idempotency protection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingResult {
    /// Message was processed for the first time.
    Success,
    /// Message had already been processed; no effect was (re)applied.
    AlreadyProcessed,
    /// The caller's business effect returned an error.
    Failed(String),
}

impl ProcessingResult {
    pub fn is_ok(&self) -> bool {
        matches!(
            self,
            ProcessingResult::Success | ProcessingResult::AlreadyProcessed
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ProcessingResult::Failed(_))
    }
}

/// Row recorded in `processed_messages` once a message has been applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub message_id: String,
    pub processed_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

/// Idempotency guard for message processing.
///
/// Thread-safe; share across tasks with `Arc<IdempotencyGuard>` (it is
/// already `Clone` since the underlying `PgPool` is a cheap handle).
#[derive(Clone)]
pub struct IdempotencyGuard {
    pool: PgPool,
    retention_duration: Duration,
}

impl IdempotencyGuard {
    pub fn new(pool: PgPool, retention_duration: Duration) -> Self {
        Self {
            pool,
            retention_duration,
        }
    }

    /// Check if a message has already been processed.
    ///
    /// Fast O(1) lookup using the unique index on `message_id`. This is a
    /// plain pool query — for the atomic check-and-process path, use
    /// [`process_if_new_tx`](Self::process_if_new_tx) instead, which
    /// performs the equivalent check inside the effect transaction.
    pub async fn is_processed(&self, event_id: &str) -> IdempotencyResult<bool> {
        Self::validate_event_id(event_id)?;

        let result = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM processed_messages WHERE message_id = $1
            ) AS exists
            "#,
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check if message is processed")?;

        let exists: bool = result.try_get("exists")?;

        if exists {
            debug!(message_id = %event_id, "Message already processed");
        }

        Ok(exists)
    }

    /// Mark a message as processed, outside of any caller transaction.
    ///
    /// Uses `INSERT ... ON CONFLICT DO NOTHING`, so concurrent callers
    /// racing on the same id never error — only the first insert takes
    /// effect.
    pub async fn mark_processed(
        &self,
        event_id: &str,
        metadata: Option<serde_json::Value>,
    ) -> IdempotencyResult<bool> {
        Self::validate_event_id(event_id)?;

        let result = sqlx::query(
            r#"
            INSERT INTO processed_messages (message_id, metadata, processed_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(&metadata)
        .execute(&self.pool)
        .await
        .context("Failed to mark message as processed")?;

        let was_inserted = result.rows_affected() > 0;

        if was_inserted {
            info!(message_id = %event_id, has_metadata = metadata.is_some(), "Message marked as processed");
        } else {
            debug!(message_id = %event_id, "Message already marked as processed (duplicate)");
        }

        Ok(was_inserted)
    }

    /// Process a message only if it hasn't been processed before.
    ///
    /// Non-transactional variant: the dedup check, the caller's closure,
    /// and the dedup insert are three separate pool round-trips. Suitable
    /// when the business effect has nothing to do with this pool (an
    /// external API call, say). For effects that write to this same
    /// database, prefer [`process_if_new_tx`](Self::process_if_new_tx),
    /// which gives the atomicity the contract in this crate's module docs
    /// promises.
    pub async fn process_if_new<F, Fut>(
        &self,
        event_id: &str,
        f: F,
    ) -> IdempotencyResult<ProcessingResult>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), anyhow::Error>>,
    {
        Self::validate_event_id(event_id)?;

        if self.is_processed(event_id).await? {
            return Ok(ProcessingResult::AlreadyProcessed);
        }

        match f().await {
            Ok(_) => {
                self.mark_processed(event_id, None).await?;
                Ok(ProcessingResult::Success)
            }
            Err(e) => {
                warn!(message_id = %event_id, error = ?e, "Message processing failed");
                Ok(ProcessingResult::Failed(e.to_string()))
            }
        }
    }

    /// Process a message exactly as the consumer contract requires: dedup
    /// check, business effect, and dedup insert all commit or roll back
    /// together in one transaction.
    ///
    /// `effect` receives a mutable borrow of the open transaction so it can
    /// run its own queries (e.g. `UPDATE orders SET status = 'COMPLETED'`)
    /// against the same connection the dedup row will be inserted on.
    ///
    /// On the tie-break case — two workers racing the same message id with
    /// overlapping transactions — the loser's insert hits the unique
    /// constraint on `message_id`; that is translated to
    /// `ProcessingResult::AlreadyProcessed`, not an error, per the contract.
    pub async fn process_if_new_tx<F>(
        &self,
        event_id: &str,
        effect: F,
    ) -> IdempotencyResult<ProcessingResult>
    where
        F: for<'t> FnOnce(
                &'t mut Transaction<'_, Postgres>,
            ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 't>>
            + Send,
    {
        Self::validate_event_id(event_id)?;

        let mut tx = self.pool.begin().await.map_err(IdempotencyError::Database)?;

        let already: bool = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM processed_messages WHERE message_id = $1
            ) AS exists
            "#,
        )
        .bind(event_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(IdempotencyError::Database)?
        .try_get("exists")?;

        if already {
            tx.commit().await.map_err(IdempotencyError::Database)?;
            debug!(message_id = %event_id, "Message already processed");
            return Ok(ProcessingResult::AlreadyProcessed);
        }

        if let Err(e) = effect(&mut tx).await {
            tx.rollback().await.map_err(IdempotencyError::Database)?;
            warn!(message_id = %event_id, error = ?e, "Message processing failed, rolled back");
            return Ok(ProcessingResult::Failed(e.to_string()));
        }

        let insert = sqlx::query(
            r#"
            INSERT INTO processed_messages (message_id, processed_at)
            VALUES ($1, NOW())
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .execute(&mut *tx)
        .await
        .map_err(IdempotencyError::Database)?;

        if insert.rows_affected() == 0 {
            // Lost the race between our check and our insert: another
            // transaction committed first. Our business effect still ran
            // inside our own transaction, so rolling back discards it.
            tx.rollback().await.map_err(IdempotencyError::Database)?;
            debug!(message_id = %event_id, "Lost dedup race, rolled back own effect");
            return Ok(ProcessingResult::AlreadyProcessed);
        }

        tx.commit().await.map_err(IdempotencyError::Database)?;
        info!(message_id = %event_id, "Message processed and marked");
        Ok(ProcessingResult::Success)
    }

    /// Delete processed-message rows older than the configured retention.
    ///
    /// Call periodically (a background interval task in each consumer
    /// binary) to keep `processed_messages` bounded.
    pub async fn cleanup_old_events(&self) -> IdempotencyResult<u64> {
        let cutoff_time = Utc::now()
            - chrono::Duration::from_std(self.retention_duration).map_err(|e| {
                IdempotencyError::Other(anyhow::anyhow!("Invalid retention duration: {}", e))
            })?;

        let result = sqlx::query(
            r#"
            DELETE FROM processed_messages
            WHERE processed_at < $1
            "#,
        )
        .bind(cutoff_time)
        .execute(&self.pool)
        .await
        .context("Failed to cleanup old processed messages")?;

        let deleted_count = result.rows_affected();

        if deleted_count > 0 {
            info!(deleted_count = deleted_count, cutoff_time = %cutoff_time, "Cleaned up old processed messages");
        } else {
            debug!("No old processed messages to clean up");
        }

        Ok(deleted_count)
    }

    fn validate_event_id(event_id: &str) -> IdempotencyResult<()> {
        if event_id.is_empty() {
            return Err(IdempotencyError::InvalidEventId(
                "Message ID cannot be empty".to_string(),
            ));
        }

        if event_id.len() > 255 {
            return Err(IdempotencyError::InvalidEventId(format!(
                "Message ID too long: {} characters (max 255)",
                event_id.len()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_event_id() {
        assert!(IdempotencyGuard::validate_event_id("event-123").is_ok());
        assert!(IdempotencyGuard::validate_event_id("a").is_ok());
        assert!(IdempotencyGuard::validate_event_id(&"x".repeat(255)).is_ok());

        let err = IdempotencyGuard::validate_event_id("").unwrap_err();
        assert!(matches!(err, IdempotencyError::InvalidEventId(_)));

        let err = IdempotencyGuard::validate_event_id(&"x".repeat(256)).unwrap_err();
        assert!(matches!(err, IdempotencyError::InvalidEventId(_)));
    }

    #[test]
    fn test_processing_result() {
        assert!(ProcessingResult::Success.is_ok());
        assert!(ProcessingResult::AlreadyProcessed.is_ok());
        assert!(!ProcessingResult::Failed("error".to_string()).is_ok());

        assert!(!ProcessingResult::Success.is_failed());
        assert!(!ProcessingResult::AlreadyProcessed.is_failed());
        assert!(ProcessingResult::Failed("error".to_string()).is_failed());
    }
}
