//! Completion gateway service entry point.
//!
//! Loads the YAML configuration, initialises observability, builds the
//! request-lifecycle service, and serves the HTTP API.

use std::path::Path;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware::Compress, web};
use anyhow::Result;
use dotenvy::dotenv;
use tracing::info;
use utoipa::OpenApi;
use utoipa_actix_web::AppExt;
use utoipa_swagger_ui::SwaggerUi;

use completion_api::api;
use completion_api::config::GatewayConfig;
use completion_api::lifecycle::CompletionService;
use completion_api::observability;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Code Completion Gateway",
        description = "Front-door service for editor code-completion requests: admission filtering, code-base context enrichment, per-model flow control, and completion post-processing",
        version = "1.0.0"
    ),
    tags(
        (name = "completions", description = "Code completion"),
        (name = "health", description = "Health check endpoints"),
        (name = "operations", description = "Operator endpoints")
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CONFIG_PATH").ok())
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = GatewayConfig::load(Path::new(&config_path))?;

    let prometheus = observability::init_observability(&config.server)?;

    info!(
        config = %config_path,
        models = config.models.len(),
        context_enabled = config.codebase_context.enabled,
        "Starting completion-api server"
    );
    for model in &config.models {
        info!(
            model = %model.model_name,
            tags = ?model.tags,
            max_concurrent = model.max_concurrent,
            fim = model.fim_mode,
            "Model pool configured"
        );
    }

    let service = web::Data::new(CompletionService::from_config(&config));
    service.start_maintenance();

    let hostname = config.server.host.clone();
    let port = config.server.port;
    let cors_origins = config.server.cors_allowed_origins.clone();

    let server = HttpServer::new(move || {
        // Configure CORS
        let cors = if cors_origins.contains(&"*".to_string()) {
            Cors::permissive()
        } else {
            let mut cors = Cors::default()
                .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                .allowed_headers(vec![
                    actix_web::http::header::CONTENT_TYPE,
                    actix_web::http::header::AUTHORIZATION,
                ])
                .supports_credentials()
                .max_age(3600);
            for origin in &cors_origins {
                cors = cors.allowed_origin(origin);
            }
            cors
        };

        App::new()
            .wrap(prometheus.clone())
            .wrap(cors)
            .wrap(Compress::default())
            .app_data(service.clone())
            .into_utoipa_app()
            .openapi(ApiDoc::openapi())
            // Health endpoints
            .service(api::health::health_live)
            .service(api::health::health_ready)
            // Completion endpoints
            .service(api::completions::completions)
            .service(api::completions::completions_v1)
            // Operator endpoints
            .service(api::logs::set_level)
            .service(api::introspection::inflight)
            .service(api::introspection::list_models)
            // Swagger UI
            .openapi_service(|api| {
                SwaggerUi::new("/swagger-ui/{_:.*}").url("/api/openapi.json", api)
            })
            .into_app()
    });

    info!(
        hostname = %hostname,
        port = port,
        "Server running at http://{}:{}",
        hostname,
        port
    );

    server.bind((hostname.as_str(), port))?.run().await?;

    Ok(())
}
