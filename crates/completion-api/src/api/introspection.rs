//! Operator introspection.

use actix_web::{HttpResponse, Responder, get, web};

use crate::lifecycle::CompletionService;
use crate::pool::{ModelSummary, PoolSnapshot};

/// Snapshot of every pool's in-flight requests
#[utoipa::path(
    get,
    path = "/api/inflight",
    responses(
        (status = 200, description = "Per-pool in-flight requests", body = [PoolSnapshot])
    ),
    tag = "operations"
)]
#[get("/api/inflight")]
pub async fn inflight(service: web::Data<CompletionService>) -> impl Responder {
    HttpResponse::Ok().json(service.pools().snapshot())
}

/// Configured models and their routing tags
#[utoipa::path(
    get,
    path = "/api/models",
    responses(
        (status = 200, description = "Configured models", body = [ModelSummary])
    ),
    tag = "operations"
)]
#[get("/api/models")]
pub async fn list_models(service: web::Data<CompletionService>) -> impl Responder {
    HttpResponse::Ok().json(service.pools().model_summaries())
}
