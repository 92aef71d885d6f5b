mod config;
mod error;
mod handlers;
mod models;

use actix_web::{web, App, HttpResponse, HttpServer};
use config::ConsumerConfig;
use db_pool::{create_pool, DbConfig};
use idempotent_consumer::IdempotencyGuard;
use prometheus::{register_int_counter, IntCounter};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

lazy_static::lazy_static! {
    static ref MESSAGES_PROCESSED: IntCounter = register_int_counter!(
        "consumer_messages_processed_total",
        "Messages that resulted in a new business effect"
    ).expect("Prometheus metrics registration should succeed at startup");

    static ref MESSAGES_DUPLICATE: IntCounter = register_int_counter!(
        "consumer_duplicates_total",
        "Messages absorbed as duplicates via the idempotency guard"
    ).expect("Prometheus metrics registration should succeed at startup");

    static ref MESSAGES_FAILED: IntCounter = register_int_counter!(
        "consumer_messages_failed_total",
        "Messages nacked after a processing error"
    ).expect("Prometheus metrics registration should succeed at startup");
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok", "service": "order-consumer"}))
}

async fn metrics() -> HttpResponse {
    use prometheus::Encoder;
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = prometheus::TextEncoder::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = ?e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }
    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

/// Waits for SIGINT or SIGTERM, the single process-wide cancellation
/// handle every worker observes.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    }
}

/// Consume loop: pull one message at a time, run it through the
/// idempotency guard, and only commit its offset after the guard's
/// transaction has committed: `ok` maps to ack (commit offset), `fail`
/// maps to nack-and-requeue (no commit; the broker redelivers). There
/// is no batching here — a crash between processing and commit simply
/// means the next poll redelivers the same message, which the guard is
/// built to absorb.
async fn run_consume_loop(
    consumer: Arc<StreamConsumer>,
    guard: Arc<IdempotencyGuard>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Consume loop shutdown requested");
                break;
            }
            recv = consumer.recv() => {
                match recv {
                    Ok(message) => {
                        let Some(payload) = message.payload() else {
                            tracing::warn!("Received message with empty payload, skipping");
                            if let Err(e) = consumer.commit_message(&message, rdkafka::consumer::CommitMode::Async) {
                                tracing::error!(error = ?e, "Failed to commit offset for empty message");
                            }
                            continue;
                        };

                        let message_id = message
                            .key()
                            .map(|k| String::from_utf8_lossy(k).to_string())
                            .unwrap_or_else(|| format!("{}-{}", message.partition(), message.offset()));

                        match handlers::handle_message(&guard, &message_id, payload).await {
                            Ok(idempotent_consumer::ProcessingResult::Success) => {
                                MESSAGES_PROCESSED.inc();
                                tracing::info!(message_id = %message_id, "Message processed");
                            }
                            Ok(idempotent_consumer::ProcessingResult::AlreadyProcessed) => {
                                MESSAGES_DUPLICATE.inc();
                                tracing::debug!(message_id = %message_id, "Duplicate message absorbed");
                            }
                            Ok(idempotent_consumer::ProcessingResult::Failed(_)) => {
                                unreachable!("handle_message maps Failed to Err before returning")
                            }
                            Err(e) => {
                                MESSAGES_FAILED.inc();
                                tracing::error!(message_id = %message_id, error = ?e, "Message processing failed, will redeliver");
                                // Nack: do not commit this offset. The broker
                                // redelivers on the next poll after rebalance
                                // or restart.
                                continue;
                            }
                        }

                        if let Err(e) = consumer.commit_message(&message, rdkafka::consumer::CommitMode::Async) {
                            tracing::error!(error = ?e, "Failed to commit Kafka offset");
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = ?e, "Kafka consumer recv error");
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
        }
    }
}

/// Periodically purge `processed_messages` rows older than the
/// configured retention, per `IdempotencyGuard::cleanup_old_events`.
async fn run_cleanup_loop(
    guard: Arc<IdempotencyGuard>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match guard.cleanup_old_events().await {
                    Ok(count) if count > 0 => tracing::info!(deleted = count, "Purged old processed_messages rows"),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = ?e, "processed_messages cleanup sweep failed"),
                }
            }
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ConsumerConfig::from_env();
    tracing::info!(
        topic = %config.kafka_topic,
        group_id = %config.kafka_group_id,
        "Starting order-consumer"
    );

    let mut db_config = DbConfig::from_env("order-consumer");
    db_config.database_url = config.database_url.clone();
    db_config.log_config();

    let pool = match create_pool(db_config).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Database pool creation failed: {e}");
            std::process::exit(1);
        }
    };

    let guard = Arc::new(IdempotencyGuard::new(pool, config.dedup_retention));

    let consumer: StreamConsumer = match ClientConfig::new()
        .set("bootstrap.servers", &config.kafka_brokers)
        .set("group.id", &config.kafka_group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .set("session.timeout.ms", "10000")
        .create()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Kafka consumer creation failed: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = consumer.subscribe(&[config.kafka_topic.as_str()]) {
        tracing::error!("Kafka subscribe failed: {e}");
        std::process::exit(1);
    }

    let consumer = Arc::new(consumer);
    let cancel = CancellationToken::new();

    let consume_cancel = cancel.clone();
    let consume_guard = guard.clone();
    let consume_consumer = consumer.clone();
    let consume_task = tokio::spawn(async move {
        run_consume_loop(consume_consumer, consume_guard, consume_cancel).await;
    });

    let cleanup_cancel = cancel.clone();
    let cleanup_guard = guard.clone();
    let cleanup_interval = config.cleanup_interval;
    let cleanup_task = tokio::spawn(async move {
        run_cleanup_loop(cleanup_guard, cleanup_interval, cleanup_cancel).await;
    });

    let metrics_bind = format!("{}:{}", config.metrics_host, config.metrics_port);
    let server = HttpServer::new(|| {
        App::new()
            .route("/health", web::get().to(health))
            .route("/metrics", web::get().to(metrics))
    })
    .bind(&metrics_bind)?
    .workers(1)
    .run();
    let server_handle = server.handle();

    tracing::info!("Consumer metrics server listening on {metrics_bind}");

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = ?e, "Metrics server exited with error");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received, stopping order-consumer");
        }
    }

    cancel.cancel();
    server_handle.stop(true).await;

    if let Err(e) = tokio::time::timeout(Duration::from_secs(30), async {
        let _ = tokio::join!(consume_task, cleanup_task);
    })
    .await
    {
        tracing::warn!(error = ?e, "order-consumer tasks did not stop within shutdown grace period");
    }

    tracing::info!("order-consumer shut down cleanly");
    Ok(())
}
