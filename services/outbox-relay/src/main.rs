mod config;

use actix_web::{web, App, HttpResponse, HttpServer};
use config::RelayConfig;
use db_pool::{create_pool, DbConfig};
use rdkafka::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transactional_outbox::{
    metrics::OutboxMetrics, CircuitBreakerKafkaPublisher, OutboxProcessor, RelayWorkerPool,
    SqlxOutboxRepository,
};

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

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok", "service": "outbox-relay"}))
}

/// Waits for SIGINT or SIGTERM. A shutdown signal is the single
/// process-wide cancellation handle: every worker
/// loop and the metrics server observe the same token.
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

    let config = RelayConfig::from_env();
    tracing::info!(
        worker_count = config.worker_count,
        batch_size = config.batch_size,
        tick_interval_secs = config.tick_interval.as_secs(),
        "Starting outbox-relay"
    );

    let mut db_config = DbConfig::from_env("outbox-relay");
    db_config.database_url = config.database_url.clone();
    db_config.log_config();

    let pool = match create_pool(db_config).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Database pool creation failed: {e}");
            std::process::exit(1);
        }
    };

    let producer: rdkafka::producer::FutureProducer = match ClientConfig::new()
        .set("bootstrap.servers", &config.kafka_brokers)
        .set("enable.idempotence", "true")
        .set("acks", "all")
        .set("max.in.flight.requests.per.connection", "5")
        .create()
    {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("Kafka producer creation failed: {e}");
            std::process::exit(1);
        }
    };

    let repository = Arc::new(SqlxOutboxRepository::new(pool));
    let publisher = Arc::new(CircuitBreakerKafkaPublisher::new(
        producer,
        config.kafka_topic_prefix.clone(),
    ));
    let metrics_handle = Arc::new(OutboxMetrics::new("outbox-relay"));

    let processor = OutboxProcessor::new(
        repository,
        publisher,
        config.batch_size,
        config.tick_interval,
    )
    .with_metrics(metrics_handle);

    let pool_worker = RelayWorkerPool::new(config.worker_count, processor);
    let cancel = CancellationToken::new();

    let metrics_bind = format!("{}:{}", config.metrics_host, config.metrics_port);
    let server = HttpServer::new(|| {
        App::new()
            .route("/metrics", web::get().to(metrics))
            .route("/health", web::get().to(health))
    })
    .bind(&metrics_bind)?
    .workers(1)
    .run();
    let server_handle = server.handle();

    tracing::info!("Relay metrics server listening on {metrics_bind}");

    let worker_cancel = cancel.clone();
    let worker_task = tokio::spawn(async move {
        pool_worker.run(worker_cancel).await;
    });

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = ?e, "Metrics server exited with error");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received, stopping relay workers");
        }
    }

    cancel.cancel();
    server_handle.stop(true).await;

    if let Err(e) = tokio::time::timeout(Duration::from_secs(30), worker_task).await {
        tracing::warn!(error = ?e, "Relay workers did not stop within shutdown grace period");
    }

    tracing::info!("outbox-relay shut down cleanly");
    Ok(())
}
