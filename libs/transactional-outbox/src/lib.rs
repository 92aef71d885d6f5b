//! # Transactional Outbox relay
//!
//! Implements the claim → publish → retire half of the transactional
//! outbox pattern: a fleet of independent workers that drain a
//! PostgreSQL-backed outbox table into a message broker with
//! at-least-once delivery and no coordination beyond the database
//! itself.
//!
//! ## Why `FOR UPDATE SKIP LOCKED`
//!
//! Every worker runs the identical claim query. Row-level locking with
//! `SKIP LOCKED` gives each worker a disjoint batch under concurrent
//! load: no two workers ever hold overlapping claim transactions over
//! the same row, and a worker never blocks waiting on a peer's lock —
//! it just moves on to the next unlocked row. This is what makes
//! horizontal scaling of the relay pool free.
//!
//! ## Retire ordering
//!
//! Publish happens, then retire (delete) happens, in the same claim
//! transaction, then the transaction commits. If the worker dies
//! between a successful publish and the commit, the delete never took
//! effect: the row is still `PENDING` on the next tick and gets
//! republished. The inverse order — delete before publish — would
//! silently drop events on crash, so it's never done here.
//!
//! ## Backoff is out-of-band, not held in the claim transaction
//!
//! A failed publish pushes the row's `next_attempt_at` into the future
//! and commits immediately; the claim query then simply skips rows
//! whose backoff window hasn't elapsed. No worker ever sleeps while
//! holding the claim transaction open — that would pin a pooled
//! connection and the row locks on the rest of the batch for the
//! backoff duration, stalling retirement of every other row in it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use transactional_outbox::{OutboxEvent, OutboxRepository, SqlxOutboxRepository};
//! use sqlx::{PgPool, Postgres, Transaction};
//! use uuid::Uuid;
//! use chrono::Utc;
//!
//! async fn create_order(
//!     pool: &PgPool,
//!     outbox_repo: &SqlxOutboxRepository,
//!     user_id: String,
//!     amount: f64,
//! ) -> Result<Uuid, Box<dyn std::error::Error>> {
//!     let mut tx = pool.begin().await?;
//!
//!     let order_id = Uuid::new_v4();
//!     sqlx::query("INSERT INTO orders (id, user_id, amount, status) VALUES ($1, $2, $3, 'PENDING')")
//!         .bind(order_id)
//!         .bind(&user_id)
//!         .bind(amount)
//!         .execute(&mut *tx)
//!         .await?;
//!
//!     let event = OutboxEvent {
//!         id: Uuid::new_v4(),
//!         aggregate_id: order_id,
//!         payload: serde_json::json!({
//!             "event_type": "OrderCreated",
//!             "order_id": order_id,
//!             "user_id": user_id,
//!             "amount": amount,
//!         }),
//!         metadata: None,
//!         created_at: Utc::now(),
//!         retry_count: 0,
//!         last_error: None,
//!     };
//!
//!     outbox_repo.insert(&mut tx, &event).await?;
//!     tx.commit().await?;
//!
//!     Ok(order_id)
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use resilience::CircuitBreaker;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

mod error;
pub mod macros;
pub mod metrics;

pub use error::{OutboxError, OutboxResult};

/// Represents an event stored in the outbox table.
///
/// Created within the same database transaction as the domain row it
/// reports on. Payload is opaque to
/// everything downstream of the producer; the relay only shallow-decodes
/// it for a routing hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Unique identifier for this event. Becomes the broker-level
    /// message identifier once published, which is what lets the
    /// consumer-side `processed_messages` table dedup on it.
    pub id: Uuid,

    /// Back-reference to the domain row this event reports on.
    pub aggregate_id: Uuid,

    /// Self-describing payload. Must carry at minimum `event_type`,
    /// used by the relay as the routing hint.
    pub payload: serde_json::Value,

    /// Optional metadata (correlation_id, trace_id, etc.), never
    /// inspected by the relay itself.
    pub metadata: Option<serde_json::Value>,

    /// Timestamp when event was created; claim order is by this column.
    pub created_at: DateTime<Utc>,

    /// Number of failed publish attempts. Bumped in the same claim
    /// transaction as the failed attempt, so a crash mid-batch loses
    /// the increment along with everything else in that transaction —
    /// consistent with "at most one committed mutation per batch cycle".
    pub retry_count: i32,

    /// Last error message from a failed publish attempt, for operator
    /// visibility into why a row is still pending.
    pub last_error: Option<String>,
}

impl OutboxEvent {
    /// Extract the routing hint the relay hands to the publisher.
    ///
    /// Extracts the routing hint by shallow-decoding the payload (e.g.,
    /// the `event_type` field). Malformed/missing `event_type` is a
    /// poison payload: the row stays `PENDING` and is skipped this tick
    /// rather than quarantined.
    pub fn routing_hint(&self) -> OutboxResult<&str> {
        self.payload
            .get("event_type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                OutboxError::Other(anyhow::anyhow!(
                    "event {} payload missing string `event_type`",
                    self.id
                ))
            })
    }
}

/// Repository trait for the producer-side half of the outbox: inserting
/// a new event inside the caller's transaction, and reporting pending
/// backlog stats for observability.
///
/// The claim/retire half of the relay lives on [`SqlxOutboxRepository`]
/// as inherent methods rather than trait methods: `FOR UPDATE SKIP
/// LOCKED` and the open-transaction handle it returns are inherently
/// PostgreSQL-shaped, and there is no second backing store in this
/// workspace to justify abstracting over it (see DESIGN.md).
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Insert a new event into the outbox within a transaction.
    ///
    /// MUST be called within an existing transaction that also writes
    /// the domain row, so both commit or neither does.
    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &OutboxEvent,
    ) -> OutboxResult<()>;

    /// Compute pending count and oldest pending age (seconds). Age is 0
    /// when nothing is pending.
    async fn pending_stats(&self) -> OutboxResult<(i64, i64)>;
}

/// SQLx-based implementation of [`OutboxRepository`] using PostgreSQL.
pub struct SqlxOutboxRepository {
    pool: PgPool,
}

impl SqlxOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Claim up to `limit` pending rows for this worker.
    ///
    /// Opens its own transaction, selects with `FOR UPDATE SKIP LOCKED`,
    /// and hands back a [`ClaimedBatch`] that
    /// owns the open transaction. Returns `Ok(None)` if nothing was
    /// claimable — the caller should commit/no-op and wait for the next
    /// tick rather than treat this as an error.
    ///
    /// Rows whose `next_attempt_at` is still in the future are excluded:
    /// a row that just failed sits out its backoff window without ever
    /// being claimed, so no worker holds its row lock (or the pooled
    /// connection underneath the claim transaction) idle while waiting
    /// to retry it.
    pub async fn claim_batch(&self, limit: i64) -> OutboxResult<Option<ClaimedBatch>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_id, payload, metadata, created_at, retry_count, last_error
            FROM outbox_events
            WHERE status = 'PENDING'
              AND (next_attempt_at IS NULL OR next_attempt_at <= NOW())
            ORDER BY created_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            tx.commit().await?;
            return Ok(None);
        }

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            events.push(OutboxEvent {
                id: row.try_get("id")?,
                aggregate_id: row.try_get("aggregate_id")?,
                payload: row.try_get("payload")?,
                metadata: row.try_get("metadata")?,
                created_at: row.try_get("created_at")?,
                retry_count: row.try_get("retry_count")?,
                last_error: row.try_get("last_error")?,
            });
        }

        debug!(count = events.len(), "Claimed outbox batch");

        Ok(Some(ClaimedBatch { tx, events }))
    }

    /// Replay events created since the given timestamp by resetting
    /// them so the next claim cycle republishes them. Operational
    /// escape hatch, not part of the normal relay loop.
    pub async fn replay_since(&self, ts: DateTime<Utc>) -> OutboxResult<u64> {
        let res = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'PENDING',
                retry_count = 0,
                last_error = NULL,
                next_attempt_at = NULL
            WHERE created_at >= $1
            "#,
        )
        .bind(ts)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }

    /// Replay events by id range (inclusive) for operational backfill.
    pub async fn replay_range(&self, from_id: Uuid, to_id: Uuid) -> OutboxResult<u64> {
        let res = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'PENDING',
                retry_count = 0,
                last_error = NULL,
                next_attempt_at = NULL
            WHERE id BETWEEN $1 AND $2
            "#,
        )
        .bind(from_id)
        .bind(to_id)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }
}

#[async_trait]
impl OutboxRepository for SqlxOutboxRepository {
    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &OutboxEvent,
    ) -> OutboxResult<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events (id, aggregate_id, payload, metadata, status, created_at, retry_count, last_error)
            VALUES ($1, $2, $3, $4, 'PENDING', $5, $6, $7)
            "#,
        )
        .bind(event.id)
        .bind(event.aggregate_id)
        .bind(&event.payload)
        .bind(&event.metadata)
        .bind(event.created_at)
        .bind(event.retry_count)
        .bind(&event.last_error)
        .execute(&mut **tx)
        .await?;

        debug!(event_id = %event.id, aggregate_id = %event.aggregate_id, "Event inserted into outbox");

        Ok(())
    }

    async fn pending_stats(&self) -> OutboxResult<(i64, i64)> {
        let rec = sqlx::query(
            r#"
            SELECT
                COUNT(*)::BIGINT AS pending,
                COALESCE(EXTRACT(EPOCH FROM (NOW() - MIN(created_at)))::BIGINT, 0) AS age_seconds
            FROM outbox_events
            WHERE status = 'PENDING'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let pending: i64 = rec.try_get("pending")?;
        let age: i64 = rec.try_get("age_seconds")?;
        Ok((pending, age))
    }
}

/// An open claim transaction holding a disjoint, lock-protected batch of
/// outbox rows. Dropping this without calling [`commit`](Self::commit)
/// rolls the transaction back, which is exactly the crash-safety
/// behavior the relay relies on for crash safety: any row not explicitly retired or
/// failed before commit simply reverts to `PENDING`.
pub struct ClaimedBatch {
    pub events: Vec<OutboxEvent>,
    tx: Transaction<'static, Postgres>,
}

impl ClaimedBatch {
    /// Retire (delete) a row after a successful publish. At most one
    /// worker ever retires a given row, because the delete
    /// only takes effect if this transaction — the one that holds the
    /// row lock — commits.
    pub async fn retire(&mut self, event_id: Uuid) -> OutboxResult<()> {
        sqlx::query("DELETE FROM outbox_events WHERE id = $1")
            .bind(event_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /// Record a failed publish attempt. The row is left `status =
    /// 'PENDING'` with `next_attempt_at` pushed out by `backoff`; it
    /// becomes claimable again once this transaction commits and
    /// releases the lock *and* the backoff window has elapsed, without
    /// any worker holding the row lock or its connection idle in the
    /// meantime.
    pub async fn mark_failed(
        &mut self,
        event_id: Uuid,
        error: &str,
        backoff: Duration,
    ) -> OutboxResult<()> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET retry_count = retry_count + 1,
                last_error = $2,
                next_attempt_at = NOW() + make_interval(secs => $3)
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .bind(error)
        .bind(backoff.as_secs_f64())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Commit the claim transaction: retired rows disappear, failed
    /// rows' retry bookkeeping persists, everything else reverts to
    /// `PENDING` for the next tick.
    pub async fn commit(self) -> OutboxResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// Publisher trait for publishing events to the broker.
///
/// Implementations must be safe to share across relay workers (either
/// genuinely concurrency-safe or internally serialized) and idempotent
/// on the receiving end, since at-least-once delivery means a
/// publish may be attempted more than once for the same row across
/// worker crashes.
///
/// Injecting this capability — not importing a concrete broker driver —
/// is what makes claim/publish/retire behavior exercisable in tests
/// without a live broker; see [`DirectDispatchPublisher`].
#[async_trait]
pub trait OutboxPublisher: Send + Sync {
    /// Publish one event. `message_id` is the outbox row id, `routing_hint`
    /// is the shallow-decoded `event_type`, `payload` is opaque bytes.
    /// `cancel` lets a publish in flight be abandoned promptly on
    /// shutdown rather than blocking the worker's exit.
    async fn publish(
        &self,
        cancel: &CancellationToken,
        message_id: Uuid,
        routing_hint: &str,
        payload: &[u8],
    ) -> OutboxResult<()>;
}

/// Kafka-based implementation of [`OutboxPublisher`].
///
/// Maps `routing_hint` (the payload's `event_type`, e.g. `"OrderCreated"`)
/// to a topic. The Kafka message key is the outbox row id itself, not
/// `aggregate_id`: there is no per-aggregate ordering guarantee
/// across workers (§5), and the row id is what downstream dedup keys on.
pub struct KafkaOutboxPublisher {
    producer: FutureProducer,
    topic_prefix: String,
}

impl KafkaOutboxPublisher {
    /// `producer` MUST be configured with `enable.idempotence = true`
    /// and `acks = all` so the broker side of at-least-once doesn't
    /// itself introduce silent loss.
    pub fn new(producer: FutureProducer, topic_prefix: String) -> Self {
        Self {
            producer,
            topic_prefix,
        }
    }

    fn topic_for(&self, routing_hint: &str) -> String {
        let aggregate = routing_hint.split('.').next().unwrap_or(routing_hint);
        format!("{}.{}.events", self.topic_prefix, aggregate.to_lowercase())
    }
}

#[async_trait]
impl OutboxPublisher for KafkaOutboxPublisher {
    async fn publish(
        &self,
        _cancel: &CancellationToken,
        message_id: Uuid,
        routing_hint: &str,
        payload: &[u8],
    ) -> OutboxResult<()> {
        let topic = self.topic_for(routing_hint);
        let message_id_str = message_id.to_string();

        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "event_type",
                value: Some(routing_hint.as_bytes()),
            })
            .insert(Header {
                key: "message_id",
                value: Some(message_id_str.as_bytes()),
            });

        let record = FutureRecord::to(&topic)
            .key(&message_id_str)
            .payload(payload)
            .headers(headers);

        self.producer
            .send(record, Duration::from_secs(30))
            .await
            .map_err(|(err, _)| OutboxError::PublishFailed(format!("Kafka publish failed: {err}")))?;

        info!(message_id = %message_id, routing_hint = %routing_hint, topic = %topic, "Event published to Kafka");

        Ok(())
    }
}

/// Wraps [`KafkaOutboxPublisher`] with a circuit breaker tuned by
/// [`resilience::presets::kafka_config`], so a Kafka outage fails fast
/// for the rest of a batch instead of letting every row in it eat the
/// send timeout in turn.
pub struct CircuitBreakerKafkaPublisher {
    inner: KafkaOutboxPublisher,
    breaker: CircuitBreaker,
}

impl CircuitBreakerKafkaPublisher {
    pub fn new(producer: FutureProducer, topic_prefix: String) -> Self {
        Self {
            inner: KafkaOutboxPublisher::new(producer, topic_prefix),
            breaker: CircuitBreaker::new(resilience::presets::kafka_config().circuit_breaker),
        }
    }
}

#[async_trait]
impl OutboxPublisher for CircuitBreakerKafkaPublisher {
    async fn publish(
        &self,
        cancel: &CancellationToken,
        message_id: Uuid,
        routing_hint: &str,
        payload: &[u8],
    ) -> OutboxResult<()> {
        self.breaker
            .call(|| self.inner.publish(cancel, message_id, routing_hint, payload))
            .await
            .map_err(|e| match e {
                resilience::CircuitBreakerError::Open => {
                    OutboxError::PublishFailed("circuit breaker open for Kafka".to_string())
                }
                resilience::CircuitBreakerError::CallFailed(msg) => OutboxError::PublishFailed(msg),
            })
    }
}

/// In-process publisher double for tests: records every publish call
/// and can be configured to fail a fixed number of times per message id
/// before succeeding, so retry/backoff behavior is exercisable without
/// Kafka.
#[derive(Clone, Default)]
pub struct DirectDispatchPublisher {
    inner: Arc<std::sync::Mutex<DirectDispatchState>>,
}

#[derive(Default)]
struct DirectDispatchState {
    delivered: Vec<(Uuid, String, Vec<u8>)>,
    fail_remaining: std::collections::HashMap<Uuid, u32>,
}

impl DirectDispatchPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` publish attempts for `message_id` fail
    /// before succeeding.
    pub fn fail_next(&self, message_id: Uuid, count: u32) {
        self.inner
            .lock()
            .expect("direct dispatch publisher mutex poisoned")
            .fail_remaining
            .insert(message_id, count);
    }

    pub fn delivered(&self) -> Vec<(Uuid, String, Vec<u8>)> {
        self.inner
            .lock()
            .expect("direct dispatch publisher mutex poisoned")
            .delivered
            .clone()
    }

    pub fn delivered_count(&self, message_id: Uuid) -> usize {
        self.inner
            .lock()
            .expect("direct dispatch publisher mutex poisoned")
            .delivered
            .iter()
            .filter(|(id, _, _)| *id == message_id)
            .count()
    }
}

#[async_trait]
impl OutboxPublisher for DirectDispatchPublisher {
    async fn publish(
        &self,
        _cancel: &CancellationToken,
        message_id: Uuid,
        routing_hint: &str,
        payload: &[u8],
    ) -> OutboxResult<()> {
        let mut state = self
            .inner
            .lock()
            .expect("direct dispatch publisher mutex poisoned");

        if let Some(remaining) = state.fail_remaining.get_mut(&message_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(OutboxError::PublishFailed(format!(
                    "simulated failure for {message_id}"
                )));
            }
        }

        state
            .delivered
            .push((message_id, routing_hint.to_string(), payload.to_vec()));
        Ok(())
    }
}

/// Runs the claim-publish-retire loop for a single worker thread.
///
/// One [`OutboxProcessor`] per worker in the pool; all workers share the
/// same connection pool and may share a publisher handle, but each
/// processor runs its own independent loop — no shared mutable state
/// between workers, all coordination via the outbox table's row locks.
pub struct OutboxProcessor<P: OutboxPublisher> {
    repository: Arc<SqlxOutboxRepository>,
    publisher: Arc<P>,
    batch_size: i64,
    tick_interval: Duration,
    metrics: Option<Arc<metrics::OutboxMetrics>>,
}

impl<P: OutboxPublisher> OutboxProcessor<P> {
    pub fn new(
        repository: Arc<SqlxOutboxRepository>,
        publisher: Arc<P>,
        batch_size: i64,
        tick_interval: Duration,
    ) -> Self {
        Self {
            repository,
            publisher,
            batch_size,
            tick_interval,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<metrics::OutboxMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Exponential backoff applied to a row's `next_attempt_at` after a
    /// failed publish: `2^retry_count` seconds, capped at 300s. Computed
    /// from the post-increment retry count, so the first failure
    /// (`retry_count` becomes 1) still gets a 1 second window rather
    /// than being immediately reclaimable.
    fn calculate_backoff(&self, retry_count: i32) -> Duration {
        const MAX_BACKOFF_SECS: u64 = 300;
        let backoff_secs = 2u64.saturating_pow(retry_count.max(0) as u32).min(MAX_BACKOFF_SECS);
        Duration::from_secs(backoff_secs)
    }

    /// Run the worker loop until `cancel` fires. Each tick runs one
    /// batch cycle (claim, publish, retire, commit); the loop exits at the next
    /// tick boundary after cancellation, never mid-transaction.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            batch_size = self.batch_size,
            tick_interval_secs = self.tick_interval.as_secs(),
            "Outbox relay worker starting"
        );

        let mut interval = tokio::time::interval(self.tick_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Outbox relay worker shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    match self.process_batch(&cancel).await {
                        Ok(0) => debug!("No pending events to publish"),
                        Ok(count) => info!(published_count = count, "Published events from outbox"),
                        Err(e) => error!(error = ?e, "Outbox relay batch cycle failed"),
                    }

                    if let Some(metrics) = &self.metrics {
                        if let Ok((pending, age)) = self.repository.pending_stats().await {
                            metrics.pending.set(pending);
                            metrics.oldest_pending_age_seconds.set(age);
                        }
                    }
                }
            }
        }

        info!("Outbox relay worker stopped gracefully");
    }

    /// One batch cycle: claim, publish each row, retire or mark-failed,
    /// commit. Returns the number of rows retired.
    async fn process_batch(&self, cancel: &CancellationToken) -> OutboxResult<i32> {
        let Some(mut batch) = self.repository.claim_batch(self.batch_size).await? else {
            return Ok(0);
        };

        if let Some(metrics) = &self.metrics {
            metrics.claimed_total.inc_by(batch.events.len() as u64);
        }

        let mut published = 0;
        let events = std::mem::take(&mut batch.events);

        for event in events {
            let routing_hint = match event.routing_hint() {
                Ok(hint) => hint.to_string(),
                Err(e) => {
                    warn!(event_id = %event.id, error = ?e, "Skipping poison event, left PENDING");
                    continue;
                }
            };

            let payload_bytes = match serde_json::to_vec(&event.payload) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(event_id = %event.id, error = ?e, "Payload re-serialization failed, left PENDING");
                    continue;
                }
            };

            match self
                .publisher
                .publish(cancel, event.id, &routing_hint, &payload_bytes)
                .await
            {
                Ok(()) => {
                    batch.retire(event.id).await?;
                    published += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.published.inc();
                    }
                }
                Err(e) => {
                    let backoff = self.calculate_backoff(event.retry_count + 1);
                    warn!(event_id = %event.id, error = ?e, backoff_secs = backoff.as_secs(), "Publish failed, backing off before next claim");
                    batch.mark_failed(event.id, &e.to_string(), backoff).await?;
                }
            }
        }

        batch.commit().await?;
        Ok(published)
    }
}

/// A fixed pool of N relay workers, each an independent task sharing
/// only the connection pool and (optionally) a publisher handle.
/// Coordination across the pool is entirely via the database's row
/// locks — there is no scatter-gather or shared mutable state here.
pub struct RelayWorkerPool<P: OutboxPublisher + 'static> {
    worker_count: usize,
    processor: Arc<OutboxProcessor<P>>,
}

impl<P: OutboxPublisher + 'static> RelayWorkerPool<P> {
    pub fn new(worker_count: usize, processor: OutboxProcessor<P>) -> Self {
        Self {
            worker_count,
            processor: Arc::new(processor),
        }
    }

    /// Spawn all workers and wait for `cancel` to fire. Returns once
    /// every worker has exited its loop.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut handles = Vec::with_capacity(self.worker_count);

        for worker_id in 0..self.worker_count {
            let processor = self.processor.clone();
            let worker_cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                info!(worker_id, "Relay worker task spawned");
                processor.run(worker_cancel).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = ?e, "Relay worker task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(event_type: &str) -> OutboxEvent {
        OutboxEvent {
            id: Uuid::new_v4(),
            aggregate_id: Uuid::new_v4(),
            payload: serde_json::json!({ "event_type": event_type, "order_id": "o1" }),
            metadata: None,
            created_at: Utc::now(),
            retry_count: 0,
            last_error: None,
        }
    }

    #[test]
    fn routing_hint_extracts_event_type() {
        let event = sample_event("OrderCreated");
        assert_eq!(event.routing_hint().unwrap(), "OrderCreated");
    }

    #[test]
    fn routing_hint_rejects_missing_event_type() {
        let mut event = sample_event("OrderCreated");
        event.payload = serde_json::json!({ "order_id": "o1" });
        assert!(event.routing_hint().is_err());
    }

    #[test]
    fn kafka_topic_mapping() {
        let producer =
            rdkafka::producer::FutureProducer::from_config(&rdkafka::ClientConfig::new()).unwrap();
        let publisher = KafkaOutboxPublisher::new(producer, "outbox".to_string());
        assert_eq!(publisher.topic_for("OrderCreated"), "outbox.ordercreated.events");
        assert_eq!(publisher.topic_for("content.published"), "outbox.content.events");
    }

    #[tokio::test]
    async fn direct_dispatch_publisher_records_deliveries() {
        let publisher = DirectDispatchPublisher::new();
        let cancel = CancellationToken::new();
        let id = Uuid::new_v4();

        publisher
            .publish(&cancel, id, "OrderCreated", b"{}")
            .await
            .unwrap();

        assert_eq!(publisher.delivered_count(id), 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let repo = Arc::new(SqlxOutboxRepository::new(
            PgPool::connect_lazy("postgresql://localhost/test").unwrap(),
        ));
        let processor = OutboxProcessor::new(
            repo,
            Arc::new(DirectDispatchPublisher::new()),
            10,
            Duration::from_secs(1),
        );
        assert_eq!(processor.calculate_backoff(0).as_secs(), 1);
        assert_eq!(processor.calculate_backoff(1).as_secs(), 2);
        assert_eq!(processor.calculate_backoff(2).as_secs(), 4);
        assert_eq!(processor.calculate_backoff(3).as_secs(), 8);
        assert_eq!(processor.calculate_backoff(4).as_secs(), 16);
        assert_eq!(processor.calculate_backoff(5).as_secs(), 32);
        assert_eq!(processor.calculate_backoff(10).as_secs(), 300);
    }

    #[tokio::test]
    async fn direct_dispatch_publisher_fails_then_succeeds() {
        let publisher = DirectDispatchPublisher::new();
        let cancel = CancellationToken::new();
        let id = Uuid::new_v4();
        publisher.fail_next(id, 1);

        assert!(publisher
            .publish(&cancel, id, "OrderCreated", b"{}")
            .await
            .is_err());
        assert!(publisher
            .publish(&cancel, id, "OrderCreated", b"{}")
            .await
            .is_ok());
        assert_eq!(publisher.delivered_count(id), 1);
    }
}
