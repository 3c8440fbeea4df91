//! Code-base context enrichment.
//!
//! Fans out to the definition, semantic, and relation search services under
//! a single wall-clock budget and merges whatever answered in time. The
//! enclosing request never fails because of this stage: transport errors are
//! logged and swallowed, and an expired budget simply yields the partial
//! (possibly empty) merge.

use futures::future::join_all;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use completion_gateway_core::observability::record_context_request;

use crate::config::CodebaseContextConfig;
use crate::language::Lang;
use crate::models::{CompletionRequest, ProcessedPrompt};

/// Headers forwarded verbatim from the editor to the auxiliary services.
#[derive(Debug, Clone, Default)]
pub struct ForwardHeaders {
    pub request_id: Option<String>,
    pub authorization: Option<String>,
    pub client_version: Option<String>,
}

impl ForwardHeaders {
    fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        if let Some(v) = self.request_id.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
            map.insert("x-request-id", v);
        }
        if let Some(v) = self
            .authorization
            .as_deref()
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            map.insert("authorization", v);
        }
        if let Some(v) = self
            .client_version
            .as_deref()
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            map.insert("x-costrict-version", v);
        }
        map
    }
}

/// What the lifecycle hands to the fan-out.
#[derive(Debug, Clone, Default)]
pub struct ContextInput {
    pub client_id: String,
    pub codebase_path: String,
    pub full_file_path: String,
    pub code_snippets: Vec<String>,
    pub queries: Vec<String>,
}

impl ContextInput {
    /// Derive search inputs from the request: the cursor line drives the
    /// definition/relation lookups, the trailing lines of the prefix form
    /// the semantic query.
    pub fn from_request(req: &CompletionRequest, prompt: &ProcessedPrompt) -> Self {
        let snippet = prompt.cursor_line_prefix.trim().to_string();
        let query = tail_lines(&prompt.prefix, 5);
        Self {
            client_id: req.client_id.clone(),
            codebase_path: req.project_path.clone(),
            full_file_path: req.file_project_path.clone(),
            code_snippets: if snippet.is_empty() { Vec::new() } else { vec![snippet] },
            queries: if query.trim().is_empty() { Vec::new() } else { vec![query] },
        }
    }
}

fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

/// One `{filePath, content}` record from any of the three services.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextRecord {
    pub file_path: String,
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListEnvelope {
    data: ListData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListData {
    list: Vec<ContextRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Definition,
    Semantic,
    Relation,
}

impl Endpoint {
    fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Definition => "definition",
            Endpoint::Semantic => "semantic",
            Endpoint::Relation => "relation",
        }
    }
}

pub struct ContextClient {
    cfg: CodebaseContextConfig,
    client: reqwest::Client,
}

impl ContextClient {
    pub fn new(cfg: CodebaseContextConfig) -> Self {
        Self {
            cfg,
            client: completion_gateway_core::http_client::HTTP_CLIENT.clone(),
        }
    }

    /// Fetch and merge code-base context, bounded by `totalTimeoutMs`.
    ///
    /// Returns the merged comment-wrapped context, empty when nothing
    /// answered in time or the input short-circuits.
    #[instrument(skip(self, input, headers, cancel), fields(client_id = %input.client_id))]
    pub async fn fetch(
        &self,
        input: &ContextInput,
        headers: &ForwardHeaders,
        language_id: &str,
        cancel: &CancellationToken,
    ) -> String {
        if !self.cfg.enabled
            || input.client_id.is_empty()
            || input.codebase_path.is_empty()
            || input.full_file_path.is_empty()
        {
            return String::new();
        }

        let calls = self.build_calls(input);
        if calls.is_empty() {
            return String::new();
        }

        // Indexed result slots keep the merge in call order regardless of
        // completion order. The post-write cancellation re-check under the
        // lock guarantees no slot is written after the budget expired.
        let slots: Arc<Mutex<Vec<Option<Vec<ContextRecord>>>>> =
            Arc::new(Mutex::new(vec![None; calls.len()]));
        let child = cancel.child_token();
        let header_map = headers.to_header_map();

        let mut handles = Vec::with_capacity(calls.len());
        for (index, (endpoint, payload)) in calls.into_iter().enumerate() {
            let slots = Arc::clone(&slots);
            let child = child.clone();
            let client = self.client.clone();
            let cfg = self.cfg.clone();
            let header_map = header_map.clone();
            let input = input.clone();
            handles.push(tokio::spawn(async move {
                let started = Instant::now();
                let result = tokio::select! {
                    res = call_endpoint(&client, &cfg, endpoint, &input, &payload, header_map) => res,
                    _ = child.cancelled() => return,
                };
                let elapsed = started.elapsed().as_secs_f64();
                match result {
                    Ok(records) => {
                        record_context_request(endpoint.as_str(), "success", elapsed);
                        let mut guard = match slots.lock() {
                            Ok(g) => g,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        if child.is_cancelled() {
                            return;
                        }
                        guard[index] = Some(records);
                    }
                    Err(e) => {
                        record_context_request(endpoint.as_str(), "error", elapsed);
                        warn!(endpoint = endpoint.as_str(), error = %e, "context call failed");
                    }
                }
            }));
        }

        let all = join_all(handles);
        tokio::select! {
            _ = all => {}
            _ = tokio::time::sleep(self.cfg.total_timeout()) => {
                debug!(timeout_ms = self.cfg.total_timeout_ms, "context budget expired, returning partial results");
            }
            _ = cancel.cancelled() => {}
        }
        child.cancel();

        let guard = match slots.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        merge_records(guard.iter().flatten().flatten(), language_id)
    }

    /// Call list in merge order: definition, then semantic, then relation.
    fn build_calls(&self, input: &ContextInput) -> Vec<(Endpoint, String)> {
        let mut calls = Vec::new();
        if self.cfg.enable_definition && !self.cfg.definition_url.is_empty() {
            for snippet in input.code_snippets.iter().filter(|s| !s.trim().is_empty()) {
                calls.push((Endpoint::Definition, snippet.clone()));
            }
        }
        if self.cfg.enable_semantic && !self.cfg.semantic_url.is_empty() {
            for query in input.queries.iter().filter(|q| !q.trim().is_empty()) {
                calls.push((Endpoint::Semantic, query.clone()));
            }
        }
        if self.cfg.enable_relation && !self.cfg.relation_url.is_empty() {
            for snippet in input.code_snippets.iter().filter(|s| !s.trim().is_empty()) {
                calls.push((Endpoint::Relation, snippet.clone()));
            }
        }
        calls
    }
}

async fn call_endpoint(
    client: &reqwest::Client,
    cfg: &CodebaseContextConfig,
    endpoint: Endpoint,
    input: &ContextInput,
    payload: &str,
    headers: HeaderMap,
) -> anyhow::Result<Vec<ContextRecord>> {
    let response = match endpoint {
        Endpoint::Definition => {
            client
                .get(&cfg.definition_url)
                .headers(headers)
                .query(&[
                    ("clientId", input.client_id.as_str()),
                    ("codebasePath", input.codebase_path.as_str()),
                    ("filePath", input.full_file_path.as_str()),
                    ("codeSnippet", payload),
                ])
                .send()
                .await?
        }
        Endpoint::Relation => {
            let max_layer = cfg.max_layer.to_string();
            let include_content = cfg.include_content.to_string();
            client
                .get(&cfg.relation_url)
                .headers(headers)
                .query(&[
                    ("clientId", input.client_id.as_str()),
                    ("codebasePath", input.codebase_path.as_str()),
                    ("filePath", input.full_file_path.as_str()),
                    ("codeSnippet", payload),
                    ("maxLayer", max_layer.as_str()),
                    ("includeContent", include_content.as_str()),
                ])
                .send()
                .await?
        }
        Endpoint::Semantic => {
            client
                .post(&cfg.semantic_url)
                .headers(headers)
                .json(&json!({
                    "clientId": input.client_id,
                    "codebasePath": input.codebase_path,
                    "filePath": input.full_file_path,
                    "query": payload,
                    "topK": cfg.top_k,
                    "scoreThreshold": cfg.score_threshold,
                }))
                .send()
                .await?
        }
    };

    let envelope: ListEnvelope = response.error_for_status()?.json().await?;
    Ok(envelope.data.list)
}

/// Concatenate records, wrapping each as a comment block keyed on its file
/// path, joined by newlines.
fn merge_records<'a>(
    records: impl Iterator<Item = &'a ContextRecord>,
    language_id: &str,
) -> String {
    let lang = Lang::from_language_id(language_id);
    let blocks: Vec<String> = records
        .filter(|r| !r.content.trim().is_empty())
        .map(|r| lang.wrap_comment(&r.file_path, &r.content))
        .collect();
    blocks.join("\n")
}
