//! HTTP surface: `POST /orders` — the only way anything outside this
//! process can reach the Producer Transaction.

use actix_web::{web, HttpResponse};
use error_handling::ServiceError;
use sqlx::PgPool;
use transactional_outbox::SqlxOutboxRepository;

use crate::models::CreateOrderRequest;
use crate::producer;

pub async fn create_order(
    pool: web::Data<PgPool>,
    outbox: web::Data<SqlxOutboxRepository>,
    body: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse, ServiceError> {
    let order = producer::create_order(&pool, &outbox, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(order))
}
