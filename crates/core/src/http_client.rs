//! Unified HTTP client shared by the gateway's outbound calls.
//!
//! Provides a single `reqwest::Client` reused for context fan-out and
//! upstream completion requests. Per-request deadlines are applied with
//! `RequestBuilder::timeout`, which overrides the client-wide default.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use std::time::Duration;

/// Global HTTP client instance shared across the application.
pub static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    build_client(Duration::from_secs(60)).expect("Failed to build shared HTTP client")
});

/// Build a new HTTP client with the given client-wide timeout.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(16)
        .build()
        .context("Failed to build HTTP client")
}
