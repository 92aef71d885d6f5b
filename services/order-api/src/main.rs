use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpResponse, HttpServer};
use db_pool::{create_pool, DbConfig};
use order_api::config::Config;
use order_api::handlers;
use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transactional_outbox::SqlxOutboxRepository;

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "order-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn readiness(pool: web::Data<sqlx::PgPool>) -> HttpResponse {
    match sqlx::query("SELECT 1").fetch_one(pool.get_ref()).await {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({"ready": true})),
        Err(e) => HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "ready": false,
            "error": e.to_string(),
        })),
    }
}

async fn liveness() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"alive": true}))
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

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Configuration loading failed: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!("Starting order-api v{}", env!("CARGO_PKG_VERSION"));

    let mut db_config = DbConfig::from_env("order-api");
    db_config.database_url = config.database.url.clone();
    db_config.max_connections = config.database.max_connections;
    db_config.log_config();

    let pool = match create_pool(db_config).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Database pool creation failed: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
        tracing::error!("Database migration failed: {e}");
        std::process::exit(1);
    }
    tracing::info!("Database schema migrated");

    let outbox_repo = SqlxOutboxRepository::new(pool.clone());

    let bind_address = format!("{}:{}", config.app.host, config.app.port);
    tracing::info!("order-api listening on {bind_address}");

    let pool_data = web::Data::new(pool);
    let outbox_data = web::Data::new(outbox_repo);
    let allowed_origins = config.cors.allowed_origins.clone();

    HttpServer::new(move || {
        let mut cors = Cors::default();
        for origin in allowed_origins.split(',') {
            let origin = origin.trim();
            if origin == "*" {
                cors = cors.allow_any_origin();
            } else {
                cors = cors.allowed_origin(origin);
            }
        }
        cors = cors.allow_any_method().allow_any_header().max_age(3600);

        App::new()
            .app_data(pool_data.clone())
            .app_data(outbox_data.clone())
            .wrap(cors)
            .wrap(Logger::default())
            .route("/health", web::get().to(health))
            .route("/health/ready", web::get().to(readiness))
            .route("/health/live", web::get().to(liveness))
            .route("/metrics", web::get().to(metrics))
            .route("/orders", web::post().to(handlers::create_order))
    })
    .bind(&bind_address)?
    .run()
    .await
}
