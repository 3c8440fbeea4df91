//! Observability setup for the completion gateway.
//!
//! Wires tracing and the Prometheus middleware from the shared core,
//! excluding operational endpoints from HTTP metrics.

use actix_web_prom::PrometheusMetrics;
use anyhow::Result;

use crate::config::ServerConfig;

pub fn init_observability(config: &ServerConfig) -> Result<PrometheusMetrics> {
    completion_gateway_core::observability::init_tracing(&config.log_level, &config.log_format);

    completion_gateway_core::observability::init_prometheus(
        "completion_api",
        &["/health", "/health/ready", "/metrics", "/swagger-ui"],
    )
}
