//! Upstream completion adapter.
//!
//! Speaks the OpenAI-compatible `v1/completions` contract: one POST per
//! request, no streaming, no retries. Failures are classified by transport
//! evidence so the orchestrator can map them onto the outcome taxonomy.

use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ModelConfig;
use crate::errors::LlmError;

#[derive(Debug, Serialize)]
struct UpstreamBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stop: &'a [String],
    temperature: f32,
    max_tokens: usize,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    suffix: Option<&'a str>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpstreamChoice {
    pub text: String,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpstreamUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpstreamResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<UpstreamChoice>,
    pub usage: Option<UpstreamUsage>,
}

impl UpstreamResponse {
    pub fn text(&self) -> &str {
        self.choices.first().map(|c| c.text.as_str()).unwrap_or("")
    }
}

/// Parameters for one upstream call.
#[derive(Debug, Clone)]
pub struct CompleteParams<'a> {
    pub prompt: &'a str,
    pub suffix: Option<&'a str>,
    pub stop: &'a [String],
    pub temperature: f32,
}

/// Handle to one configured backend.
pub struct LlmBackend {
    client: reqwest::Client,
    model_name: String,
    completions_url: String,
    authorization: String,
    timeout: Duration,
    max_output_token: usize,
}

impl LlmBackend {
    pub fn new(cfg: &ModelConfig) -> Self {
        Self::with_client(cfg, completion_gateway_core::http_client::HTTP_CLIENT.clone())
    }

    pub fn with_client(cfg: &ModelConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            model_name: cfg.model_name.clone(),
            completions_url: cfg.completions_url.clone(),
            authorization: cfg.authorization.clone(),
            timeout: cfg.timeout(),
            max_output_token: cfg.max_output_token,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Run one completion call, bounded by both the backend timeout and the
    /// request deadline, and cancellable through the request token.
    pub async fn complete(
        &self,
        params: CompleteParams<'_>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<UpstreamResponse, LlmError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(LlmError::Timeout);
        }
        let effective_timeout = self.timeout.min(remaining);

        let body = UpstreamBody {
            model: &self.model_name,
            prompt: params.prompt,
            stop: params.stop,
            temperature: params.temperature,
            max_tokens: self.max_output_token,
            stream: false,
            suffix: params.suffix,
        };

        let mut request = self
            .client
            .post(&self.completions_url)
            .timeout(effective_timeout)
            .json(&body);
        if !self.authorization.is_empty() {
            request = request.header(AUTHORIZATION, &self.authorization);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Canceled),
            result = request.send() => match result {
                Ok(response) => response,
                Err(e) => return Err(self.classify_transport(e, deadline, cancel)),
            },
        };

        let status = response.status();
        let raw = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Canceled),
            result = response.text() => match result {
                Ok(raw) => raw,
                Err(e) => return Err(self.classify_transport(e, deadline, cancel)),
            },
        };

        if !status.is_success() {
            warn!(
                model = %self.model_name,
                status = status.as_u16(),
                "upstream returned error status"
            );
            return Err(LlmError::Upstream {
                status: status.as_u16(),
                body: truncate_body(&raw),
            });
        }

        match serde_json::from_str::<UpstreamResponse>(&raw) {
            Ok(parsed) => {
                debug!(
                    model = %self.model_name,
                    chars = parsed.text().len(),
                    "upstream completion received"
                );
                Ok(parsed)
            }
            Err(e) => Err(LlmError::Parse(e.to_string())),
        }
    }

    fn classify_transport(
        &self,
        error: reqwest::Error,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> LlmError {
        if cancel.is_cancelled() {
            return LlmError::Canceled;
        }
        if error.is_timeout() || Instant::now() >= deadline {
            return LlmError::Timeout;
        }
        LlmError::Transport(error.to_string())
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 512;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one connection with a canned HTTP response, then close.
    async fn canned_server(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}/v1/completions")
    }

    fn backend(url: String, timeout_ms: u64) -> LlmBackend {
        LlmBackend::new(&ModelConfig {
            model_name: "test-model".to_string(),
            completions_url: url,
            timeout_ms,
            ..ModelConfig::default()
        })
    }

    fn params() -> CompleteParams<'static> {
        CompleteParams {
            prompt: "def f():",
            suffix: None,
            stop: &[],
            temperature: 0.2,
        }
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn test_success_parses_choices_and_usage() {
        let body = r#"{"id":"cmpl-1","model":"test-model","choices":[{"text":"    return 1","finish_reason":"stop"}],"usage":{"prompt_tokens":4,"completion_tokens":5,"total_tokens":9}}"#;
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let url = canned_server(Box::leak(response.into_boxed_str())).await;
        let backend = backend(url, 2000);
        let cancel = CancellationToken::new();

        let parsed = backend
            .complete(params(), far_deadline(), &cancel)
            .await
            .unwrap();
        assert_eq!(parsed.text(), "    return 1");
        assert_eq!(parsed.usage.unwrap().total_tokens, 9);
    }

    #[tokio::test]
    async fn test_non_2xx_maps_to_upstream_error() {
        let response =
            "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 5\r\nconnection: close\r\n\r\noops!";
        let url = canned_server(response).await;
        let backend = backend(url, 2000);
        let cancel = CancellationToken::new();

        let err = backend
            .complete(params(), far_deadline(), &cancel)
            .await
            .unwrap_err();
        match err {
            LlmError::Upstream { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "oops!");
            }
            other => panic!("expected Upstream, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unparseable_body_maps_to_parse_error() {
        let response =
            "HTTP/1.1 200 OK\r\ncontent-length: 12\r\nconnection: close\r\n\r\nnot json at.";
        let url = canned_server(response).await;
        let backend = backend(url, 2000);
        let cancel = CancellationToken::new();

        let err = backend
            .complete(params(), far_deadline(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Parse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_maps_to_transport_error() {
        // Port 1 on localhost refuses connections.
        let backend = backend("http://127.0.0.1:1/v1/completions".to_string(), 2000);
        let cancel = CancellationToken::new();

        let err = backend
            .complete(params(), far_deadline(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Transport(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_silent_upstream_maps_to_timeout() {
        // Accept the connection and never answer; the backend timeout wins.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((socket, _)) = listener.accept().await {
                tokio::time::sleep(Duration::from_secs(30)).await;
                drop(socket);
            }
        });
        let backend = backend(format!("http://{addr}/v1/completions"), 100);
        let cancel = CancellationToken::new();

        let err = backend
            .complete(params(), far_deadline(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Timeout), "got {err:?}");
    }

    #[tokio::test]
    async fn test_cancellation_wins_over_slow_upstream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((socket, _)) = listener.accept().await {
                tokio::time::sleep(Duration::from_secs(30)).await;
                drop(socket);
            }
        });
        let backend = backend(format!("http://{addr}/v1/completions"), 10_000);
        let cancel = CancellationToken::new();
        let canceler = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceler.cancel();
        });

        let err = backend
            .complete(params(), far_deadline(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Canceled), "got {err:?}");
    }

    #[tokio::test]
    async fn test_expired_deadline_short_circuits() {
        let backend = backend("http://127.0.0.1:1/v1/completions".to_string(), 2000);
        let cancel = CancellationToken::new();
        let err = backend
            .complete(params(), Instant::now(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Timeout));
    }

    #[tokio::test]
    async fn test_request_carries_auth_and_contract_body() {
        use std::sync::{Arc, Mutex};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let captured: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let captured_by_server = Arc::clone(&captured);
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    let text = String::from_utf8_lossy(&request).to_lowercase();
                    if let Some(pos) = text.find("\r\n\r\n") {
                        let content_length = text
                            .lines()
                            .find_map(|line| line.strip_prefix("content-length:"))
                            .and_then(|value| value.trim().parse::<usize>().ok())
                            .unwrap_or(0);
                        if request.len() >= pos + 4 + content_length {
                            break;
                        }
                    }
                }
                captured_by_server.lock().unwrap().extend_from_slice(&request);
                let body = r#"{"choices":[{"text":"ok"}]}"#;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        let backend = LlmBackend::new(&ModelConfig {
            model_name: "test-model".to_string(),
            completions_url: format!("http://{addr}/v1/completions"),
            authorization: "Bearer secret-token".to_string(),
            max_output_token: 64,
            timeout_ms: 2000,
            ..ModelConfig::default()
        });
        let stop = vec!["\n\n".to_string()];
        let cancel = CancellationToken::new();
        backend
            .complete(
                CompleteParams {
                    prompt: "def f():",
                    suffix: Some("\nreturn x"),
                    stop: &stop,
                    temperature: 0.3,
                },
                far_deadline(),
                &cancel,
            )
            .await
            .unwrap();

        let raw = captured.lock().unwrap().clone();
        let raw = String::from_utf8_lossy(&raw).to_string();
        assert!(
            raw.to_lowercase().contains("authorization: bearer secret-token"),
            "missing auth header in:\n{raw}"
        );

        let body_start = raw.find("\r\n\r\n").expect("request has a body") + 4;
        let body: serde_json::Value = serde_json::from_str(&raw[body_start..]).unwrap();
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["prompt"], "def f():");
        assert_eq!(body["suffix"], "\nreturn x");
        assert_eq!(body["stream"], false);
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["stop"], serde_json::json!(["\n\n"]));
    }

    #[test]
    fn test_body_serialization_omits_absent_suffix() {
        let body = UpstreamBody {
            model: "m",
            prompt: "p",
            stop: &[],
            temperature: 0.1,
            max_tokens: 10,
            stream: false,
            suffix: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("suffix").is_none());
        assert_eq!(json["stream"], false);
    }
}
