//! HTTP-layer tests: route registration and outcome-to-status mapping.

use actix_web::{App, test, web};

use completion_api::api;
use completion_api::config::{CodebaseContextConfig, GatewayConfig, ModelConfig};
use completion_api::lifecycle::CompletionService;

fn service_without_upstream() -> web::Data<CompletionService> {
    let config = GatewayConfig {
        models: vec![ModelConfig {
            model_name: "test-model".to_string(),
            tags: vec!["code".to_string()],
            // Connection-refused endpoint: requests that reach the adapter
            // come back as server errors.
            completions_url: "http://127.0.0.1:1/v1/completions".to_string(),
            ..ModelConfig::default()
        }],
        codebase_context: CodebaseContextConfig {
            enabled: false,
            ..CodebaseContextConfig::default()
        },
        ..GatewayConfig::default()
    };
    web::Data::new(CompletionService::from_config(&config))
}

#[actix_web::test]
async fn test_missing_identity_maps_to_400() {
    let app = test::init_service(
        App::new()
            .app_data(service_without_upstream())
            .service(api::completions::completions),
    )
    .await;

    let request = test::TestRequest::post()
        .uri("/api/completions")
        .set_json(serde_json::json!({
            "model": "test-model",
            "prompt": "x ="
        }))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 400);

    let body: serde_json::Value = test::read_body_json(response).await;
    assert_eq!(body["status"], "rejected");
    assert_eq!(body["object"], "text_completion");
    assert!(body["error"].as_str().unwrap().contains("MISSING_IDENTITY"));
}

#[actix_web::test]
async fn test_unreachable_upstream_maps_to_500() {
    let app = test::init_service(
        App::new()
            .app_data(service_without_upstream())
            .service(api::completions::completions),
    )
    .await;

    let request = test::TestRequest::post()
        .uri("/api/completions")
        .set_json(serde_json::json!({
            "model": "test-model",
            "prompt": "x =",
            "clientId": "c1",
            "completionId": "r1",
            "triggerMode": "MANUAL"
        }))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 500);

    let body: serde_json::Value = test::read_body_json(response).await;
    assert_eq!(body["status"], "server_error");
}

#[actix_web::test]
async fn test_versioned_route_serves_the_same_lifecycle() {
    let app = test::init_service(
        App::new()
            .app_data(service_without_upstream())
            .service(api::completions::completions_v1),
    )
    .await;

    let request = test::TestRequest::post()
        .uri("/code-completion/api/v1/completions")
        .set_json(serde_json::json!({
            "model": "test-model",
            "prompt": "x ="
        }))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 400);
}

#[actix_web::test]
async fn test_health_endpoints() {
    let app = test::init_service(
        App::new()
            .app_data(service_without_upstream())
            .service(api::health::health_live)
            .service(api::health::health_ready),
    )
    .await;

    let response = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(response.status(), 200);

    let response =
        test::call_service(&app, test::TestRequest::get().uri("/health/ready").to_request()).await;
    assert_eq!(response.status(), 200);
}

#[actix_web::test]
async fn test_model_listing() {
    let app = test::init_service(
        App::new()
            .app_data(service_without_upstream())
            .service(api::introspection::list_models),
    )
    .await;

    let response =
        test::call_service(&app, test::TestRequest::get().uri("/api/models").to_request()).await;
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = test::read_body_json(response).await;
    let models = body.as_array().unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0]["modelName"], "test-model");
    assert_eq!(models[0]["tags"], serde_json::json!(["code"]));
    assert_eq!(models[0]["maxConcurrent"], 4);
}

#[actix_web::test]
async fn test_inflight_snapshot_is_empty_at_rest() {
    let app = test::init_service(
        App::new()
            .app_data(service_without_upstream())
            .service(api::introspection::inflight),
    )
    .await;

    let response =
        test::call_service(&app, test::TestRequest::get().uri("/api/inflight").to_request()).await;
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = test::read_body_json(response).await;
    let pools = body.as_array().unwrap();
    assert_eq!(pools.len(), 1);
    assert_eq!(pools[0]["modelName"], "test-model");
    assert_eq!(pools[0]["active"], 0);
    assert!(pools[0]["inFlight"].as_array().unwrap().is_empty());
}
