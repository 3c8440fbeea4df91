//! Health check endpoints.

use actix_web::{HttpResponse, Responder, get, web};

use crate::lifecycle::CompletionService;

/// Liveness probe - always returns OK if the service is running
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is alive", body = serde_json::Value)
    ),
    tag = "health"
)]
#[get("/health")]
pub async fn health_live() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok"
    }))
}

/// Readiness probe - returns OK once model pools are initialised
#[utoipa::path(
    get,
    path = "/health/ready",
    responses(
        (status = 200, description = "Service is ready", body = serde_json::Value),
        (status = 503, description = "Service is not ready", body = serde_json::Value)
    ),
    tag = "health"
)]
#[get("/health/ready")]
pub async fn health_ready(service: web::Data<CompletionService>) -> impl Responder {
    let pool_count = service.pools().pools().len();

    if pool_count > 0 {
        HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "pools": pool_count
        }))
    } else {
        HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "status": "not_ready",
            "pools": pool_count
        }))
    }
}
