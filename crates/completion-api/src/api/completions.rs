//! Completion endpoints.
//!
//! Both routes serve the same lifecycle; the versioned path exists for
//! clients speaking the legacy route layout. Whatever the outcome, the
//! response body is a `CompletionResponse`; the HTTP status mirrors the
//! outcome taxonomy.

use actix_web::{HttpRequest, HttpResponse, Responder, post, web};
use tracing::instrument;

use crate::context::ForwardHeaders;
use crate::errors::http_status;
use crate::lifecycle::CompletionService;
use crate::models::{CompletionRequest, CompletionResponse};

/// Pull the forwarded headers off the incoming request.
fn forward_headers(req: &HttpRequest) -> ForwardHeaders {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    ForwardHeaders {
        request_id: header("x-request-id"),
        authorization: header("authorization"),
        client_version: header("x-costrict-version"),
    }
}

async fn serve(
    service: web::Data<CompletionService>,
    req: HttpRequest,
    body: web::Json<CompletionRequest>,
) -> HttpResponse {
    let headers = forward_headers(&req);
    if let Some(request_id) = headers.request_id.as_deref() {
        tracing::Span::current().record("request_id", request_id);
    }
    let response = service.complete(body.into_inner(), headers).await;
    HttpResponse::build(http_status(response.status)).json(response)
}

/// Code completion endpoint
#[utoipa::path(
    post,
    path = "/api/completions",
    request_body = CompletionRequest,
    responses(
        (status = 200, description = "Completion produced (or empty)", body = CompletionResponse),
        (status = 400, description = "Rejected by admission filtering or malformed input", body = CompletionResponse),
        (status = 408, description = "Superseded by a newer request from the same client", body = CompletionResponse),
        (status = 429, description = "No eligible model pool", body = CompletionResponse),
        (status = 504, description = "Per-request deadline expired", body = CompletionResponse),
        (status = 500, description = "Upstream or transport failure", body = CompletionResponse)
    ),
    tag = "completions"
)]
#[post("/api/completions")]
#[instrument(skip_all, fields(request_id))]
pub async fn completions(
    service: web::Data<CompletionService>,
    req: HttpRequest,
    body: web::Json<CompletionRequest>,
) -> impl Responder {
    serve(service, req, body).await
}

/// Code completion endpoint (versioned route)
#[utoipa::path(
    post,
    path = "/code-completion/api/v1/completions",
    request_body = CompletionRequest,
    responses(
        (status = 200, description = "Completion produced (or empty)", body = CompletionResponse)
    ),
    tag = "completions"
)]
#[post("/code-completion/api/v1/completions")]
#[instrument(skip_all, fields(request_id))]
pub async fn completions_v1(
    service: web::Data<CompletionService>,
    req: HttpRequest,
    body: web::Json<CompletionRequest>,
) -> impl Responder {
    serve(service, req, body).await
}
