//! End-to-end completion lifecycle.
//!
//! The orchestrator wires the stages together: identity check, pool
//! routing, latest-wins admission, filtering, bounded context enrichment,
//! prompt shaping, semaphore-gated upstream invocation, post-processing,
//! and metrics. Every admitted request produces exactly one outcome.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument};

use completion_gateway_core::observability::{
    record_completion_request, record_completion_tokens, record_filter_reject,
    record_stage_duration,
};

use crate::config::GatewayConfig;
use crate::context::{ContextClient, ContextInput, ForwardHeaders};
use crate::errors::RejectCode;
use crate::filters::{FilterChain, Verdict};
use crate::llm::CompleteParams;
use crate::models::{
    CompletionRequest, CompletionResponse, CompletionStatus, Perf, ProcessedPrompt, Usage,
    VerboseInfo,
};
use crate::pool::{ModelPool, PoolRegistry, WaitError};
use crate::postprocess::ProcessorRegistry;
use crate::prompt::{assemble_stop_words, frame_prompt, shape_prompt};
use crate::queue::{ClientQueueManager, ClientRequest};
use crate::tokenizer::Tokenizer;

const DEFAULT_TEMPERATURE: f32 = 0.2;

pub struct CompletionService {
    pools: PoolRegistry,
    queue: Arc<ClientQueueManager>,
    context: ContextClient,
    tokenizer: Tokenizer,
    filters: FilterChain,
    sweep_interval: Duration,
}

impl CompletionService {
    pub fn from_config(cfg: &GatewayConfig) -> Self {
        let processors = ProcessorRegistry::with_defaults(&cfg.completions_config);
        Self {
            pools: PoolRegistry::from_config(&cfg.models, &processors),
            queue: ClientQueueManager::new(&cfg.stream_controller),
            context: ContextClient::new(cfg.codebase_context.clone()),
            tokenizer: Tokenizer::new(cfg.completions_config.enable_tokenizer),
            filters: FilterChain::with_defaults(&cfg.completions_config),
            sweep_interval: cfg.stream_controller.sweep_interval(),
        }
    }

    /// Start the periodic queue maintenance task. Call once, after the
    /// runtime is up.
    pub fn start_maintenance(&self) {
        self.queue.spawn_sweeper(self.sweep_interval);
    }

    pub fn pools(&self) -> &PoolRegistry {
        &self.pools
    }

    pub fn queue(&self) -> &Arc<ClientQueueManager> {
        &self.queue
    }

    /// Serve one completion request from arrival to response.
    #[instrument(
        skip(self, req, headers),
        fields(client_id = %req.client_id, completion_id = %req.completion_id, model = %req.model)
    )]
    pub async fn complete(
        &self,
        mut req: CompletionRequest,
        headers: ForwardHeaders,
    ) -> CompletionResponse {
        let received_at = Instant::now();
        let mut perf = Perf {
            receive_time_ms: Utc::now().timestamp_millis(),
            ..Perf::default()
        };

        let (status, mut response) = self
            .dispatch(&mut req, &headers, received_at, &mut perf)
            .await;

        perf.total_duration_ms = received_at.elapsed().as_millis() as u64;
        if let Some(verbose) = response.verbose.as_mut() {
            verbose.perf = perf.clone();
        }

        let model_label = if response.model.is_empty() {
            "unrouted"
        } else {
            response.model.as_str()
        };
        record_completion_request(model_label, status.as_str(), received_at.elapsed().as_secs_f64());
        info!(
            status = status.as_str(),
            total_ms = perf.total_duration_ms,
            context_ms = perf.context_duration_ms,
            queue_ms = perf.queue_duration_ms,
            llm_ms = perf.llm_duration_ms,
            "completion request finished"
        );
        response
    }

    async fn dispatch(
        &self,
        req: &mut CompletionRequest,
        headers: &ForwardHeaders,
        received_at: Instant,
        perf: &mut Perf,
    ) -> (CompletionStatus, CompletionResponse) {
        if req.client_id.is_empty() || req.completion_id.is_empty() {
            record_filter_reject(RejectCode::MissingIdentity.as_str());
            return (
                CompletionStatus::Rejected,
                CompletionResponse::new(&req.model, CompletionStatus::Rejected).with_error(
                    format!("{}: clientId and completionId are required", RejectCode::MissingIdentity),
                ),
            );
        }

        let Some(pool) = self.pools.select_idlest(&req.model) else {
            return (
                CompletionStatus::Busy,
                CompletionResponse::new(&req.model, CompletionStatus::Busy)
                    .with_error("no model pool serves this request"),
            );
        };
        req.extra
            .insert("selectedModel".to_string(), json!(pool.model_name()));

        let client_request = self
            .queue
            .add(&req.client_id, &req.completion_id, pool.model_name());
        let result = self
            .run(req, &client_request, &pool, headers, received_at, perf)
            .await;
        self.queue.remove(&client_request);
        result
    }

    async fn run(
        &self,
        req: &mut CompletionRequest,
        client_request: &ClientRequest,
        pool: &Arc<ModelPool>,
        headers: &ForwardHeaders,
        received_at: Instant,
        perf: &mut Perf,
    ) -> (CompletionStatus, CompletionResponse) {
        let model_name = pool.model_name().to_string();

        let mut prompt = ProcessedPrompt::from_request(req);
        if let Verdict::Rejected(code) = self.filters.judge(req, &prompt) {
            return (
                CompletionStatus::Rejected,
                CompletionResponse::new(&model_name, CompletionStatus::Rejected)
                    .with_error(format!("request rejected: {code}")),
            );
        }

        let input = ContextInput::from_request(req, &prompt);
        let fetched = self
            .context
            .fetch(&input, headers, &req.language_id, &client_request.cancel)
            .await;
        perf.context_duration_ms = received_at.elapsed().as_millis() as u64;
        record_stage_duration(&model_name, "context", received_at.elapsed().as_secs_f64());
        prompt.code_context = merge_context(&req.import_content, &prompt.code_context, &fetched);

        shape_prompt(pool.config(), &self.tokenizer, &mut prompt);
        let framed = frame_prompt(pool.config(), &prompt);
        let stops = assemble_stop_words(&req.stop, pool.config(), &prompt.suffix);
        let temperature = req.temperature.unwrap_or(DEFAULT_TEMPERATURE);

        let outcome = pool
            .wait_and_run(client_request, || async {
                let started = Instant::now();
                let result = pool
                    .backend()
                    .complete(
                        CompleteParams {
                            prompt: &framed.prompt,
                            suffix: framed.suffix.as_deref(),
                            stop: &stops,
                            temperature,
                        },
                        client_request.deadline,
                        &client_request.cancel,
                    )
                    .await;
                (result, started.elapsed())
            })
            .await;

        let ((upstream_result, llm_elapsed), queue_wait) = match outcome {
            Ok(value) => value,
            Err(WaitError::Canceled) => {
                return (
                    CompletionStatus::Canceled,
                    CompletionResponse::new(&model_name, CompletionStatus::Canceled)
                        .with_error("request superseded or canceled"),
                );
            }
            Err(WaitError::Timeout) => {
                return (
                    CompletionStatus::Timeout,
                    CompletionResponse::new(&model_name, CompletionStatus::Timeout)
                        .with_error("deadline expired while waiting for a pool slot"),
                );
            }
        };

        perf.queue_duration_ms = queue_wait.as_millis() as u64;
        record_stage_duration(&model_name, "queue", queue_wait.as_secs_f64());
        perf.llm_duration_ms = llm_elapsed.as_millis() as u64;
        record_stage_duration(&model_name, "llm", llm_elapsed.as_secs_f64());

        let upstream = match upstream_result {
            Ok(upstream) => upstream,
            Err(error) => {
                let status = error.status();
                return (
                    status,
                    CompletionResponse::new(&model_name, status).with_error(error.to_string()),
                );
            }
        };

        let raw_text = upstream.text().to_string();
        let processed = pool.chain().run(raw_text.clone(), &prompt, &req.language_id);

        let usage = match upstream.usage {
            Some(u) => Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            },
            None => {
                let prompt_tokens = self.tokenizer.count_tokens(&framed.prompt).unwrap_or(0) as u64;
                let completion_tokens =
                    self.tokenizer.count_tokens(&processed.text).unwrap_or(0) as u64;
                Usage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens: prompt_tokens + completion_tokens,
                }
            }
        };
        perf.prompt_tokens = usage.prompt_tokens;
        perf.completion_tokens = usage.completion_tokens;
        perf.total_tokens = usage.total_tokens;
        record_completion_tokens(&model_name, usage.prompt_tokens, usage.completion_tokens);

        let status = if processed.text.is_empty() {
            CompletionStatus::Empty
        } else {
            CompletionStatus::Success
        };
        let mut response = CompletionResponse::new(&model_name, status).with_usage(usage);
        if status == CompletionStatus::Success {
            response = response.with_text(processed.text);
        }
        if req.verbose {
            response = response.with_verbose(Some(VerboseInfo {
                selected_model: model_name,
                hide_score: req.extra.get("hideScore").and_then(|v| v.as_f64()),
                fired_processors: processed.fired,
                raw_text: Some(raw_text),
                stop_words: stops,
                perf: perf.clone(),
            }));
        }
        (status, response)
    }
}

/// Combine the editor-supplied import block, any pre-supplied context, and
/// the fetched code-base context into one block.
fn merge_context(import_content: &str, existing: &str, fetched: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if !import_content.trim().is_empty() {
        parts.push(import_content);
    }
    if !existing.trim().is_empty() {
        parts.push(existing);
    }
    if !fetched.trim().is_empty() {
        parts.push(fetched);
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_context_orders_parts() {
        let merged = merge_context("import os", "# preset", "# fetched");
        assert_eq!(merged, "import os\n# preset\n# fetched");
    }

    #[test]
    fn test_merge_context_skips_blank_parts() {
        assert_eq!(merge_context("", "  ", "# fetched"), "# fetched");
        assert_eq!(merge_context("", "", ""), "");
    }
}
