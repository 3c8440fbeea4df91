//! Runtime log-level control.

use actix_web::{HttpResponse, Responder, post, web};
use serde::Deserialize;
use utoipa::ToSchema;

use completion_gateway_core::observability::set_log_level;

#[derive(Debug, Deserialize, ToSchema)]
pub struct LogLevelRequest {
    /// Any `tracing` filter directive, e.g. `info` or `debug`.
    pub level: String,
}

/// Change the active log level without restarting the service
#[utoipa::path(
    post,
    path = "/api/logs",
    request_body = LogLevelRequest,
    responses(
        (status = 200, description = "Log level changed", body = serde_json::Value),
        (status = 400, description = "Unknown log level", body = serde_json::Value)
    ),
    tag = "operations"
)]
#[post("/api/logs")]
pub async fn set_level(body: web::Json<LogLevelRequest>) -> impl Responder {
    match set_log_level(&body.level) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "level": body.level
        })),
        Err(e) => HttpResponse::BadRequest().json(serde_json::json!({
            "status": "error",
            "error": e.to_string()
        })),
    }
}
