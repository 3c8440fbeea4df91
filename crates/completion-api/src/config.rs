//! Gateway configuration.
//!
//! Loaded once at startup from a YAML file (`--config` argument or
//! `CONFIG_PATH`, default `config.yaml`). Server binding may additionally be
//! overridden from the environment for container deployments. All timeout
//! fields carry an explicit `Ms` suffix and are interpreted as milliseconds.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub codebase_context: CodebaseContextConfig,
    pub models: Vec<ModelConfig>,
    pub stream_controller: StreamControllerConfig,
    pub completions_config: CompletionsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    pub log_level: String,
    /// `json` or `pretty`.
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            cors_allowed_origins: vec!["*".to_string()],
            log_level: "info".to_string(),
            log_format: "json".to_string(),
        }
    }
}

/// Auxiliary code-base search endpoints for context enrichment.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CodebaseContextConfig {
    pub enabled: bool,
    pub definition_url: String,
    pub semantic_url: String,
    pub relation_url: String,
    pub enable_definition: bool,
    pub enable_semantic: bool,
    pub enable_relation: bool,
    /// Wall-clock budget for the whole fan-out.
    pub total_timeout_ms: u64,
    /// Semantic search result count.
    pub top_k: u32,
    /// Semantic search minimum score.
    pub score_threshold: f64,
    /// Relation search traversal depth.
    pub max_layer: u32,
    /// Ask relation search to inline file contents.
    pub include_content: bool,
}

impl Default for CodebaseContextConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            definition_url: String::new(),
            semantic_url: String::new(),
            relation_url: String::new(),
            enable_definition: true,
            enable_semantic: true,
            enable_relation: true,
            total_timeout_ms: 500,
            top_k: 5,
            score_threshold: 0.5,
            max_layer: 2,
            include_content: true,
        }
    }
}

impl CodebaseContextConfig {
    pub fn total_timeout(&self) -> Duration {
        Duration::from_millis(self.total_timeout_ms)
    }
}

/// One upstream completion backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelConfig {
    pub model_name: String,
    /// Routing tags; a pool is registered under each of them.
    pub tags: Vec<String>,
    pub completions_url: String,
    /// Value of the `Authorization` header; empty disables the header.
    pub authorization: String,
    /// Upstream call timeout, further bounded by the request deadline.
    pub timeout_ms: u64,
    /// Token budget for code context plus prefix.
    pub max_prefix_context: usize,
    /// Token budget for the suffix.
    pub max_suffix_context: usize,
    pub max_output_token: usize,
    pub fim_mode: bool,
    pub fim_begin: String,
    pub fim_hole: String,
    pub fim_end: String,
    pub fim_stop: Vec<String>,
    /// Concurrent in-flight requests this backend tolerates.
    pub max_concurrent: usize,
    /// Skip the post-processing chain entirely.
    pub disable_prune: bool,
    /// Explicit post-processor chain; empty selects the default chain.
    pub custom_pruners: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name: String::new(),
            tags: Vec::new(),
            completions_url: String::new(),
            authorization: String::new(),
            timeout_ms: 30_000,
            max_prefix_context: 4000,
            max_suffix_context: 1000,
            max_output_token: 500,
            fim_mode: false,
            fim_begin: "<|fim_begin|>".to_string(),
            fim_hole: "<|fim_hole|>".to_string(),
            fim_end: "<|fim_end|>".to_string(),
            fim_stop: Vec::new(),
            max_concurrent: 4,
            disable_prune: false,
            custom_pruners: Vec::new(),
        }
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Flow-control settings shared by the client queue manager.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamControllerConfig {
    /// Per-request deadline from admission to response.
    pub completion_timeout_ms: u64,
    /// Cadence of the idle-client sweep.
    pub sweep_interval_ms: u64,
    /// How long past its deadline an entry may linger before the sweep
    /// drops it.
    pub idle_ttl_ms: u64,
}

impl Default for StreamControllerConfig {
    fn default() -> Self {
        Self {
            completion_timeout_ms: 4500,
            sweep_interval_ms: 30_000,
            idle_ttl_ms: 60_000,
        }
    }
}

impl StreamControllerConfig {
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_millis(self.idle_ttl_ms)
    }
}

/// Tuning for admission filtering and post-processing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionsConfig {
    /// Acceptance-model threshold below which auto requests are rejected.
    pub hide_score_threshold: f64,
    /// Phrases that mark a completion as Python when the target is not.
    pub python_signatures: Vec<String>,
    /// Enable the tiktoken tokenizer; prompts pass through unshaped when off.
    pub enable_tokenizer: bool,
}

impl Default for CompletionsConfig {
    fn default() -> Self {
        Self {
            hide_score_threshold: 0.25,
            python_signatures: vec![
                "def ".to_string(),
                "elif ".to_string(),
                "self.".to_string(),
                "__init__".to_string(),
                "__name__".to_string(),
            ],
            enable_tokenizer: true,
        }
    }
}

impl GatewayConfig {
    /// Load and validate configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: GatewayConfig = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Server binding may be overridden for container deployments.
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = env::var("COMPLETION_API_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("COMPLETION_API_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
        }
        if let Ok(level) = env::var("COMPLETION_API_LOG_LEVEL") {
            self.server.log_level = level;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            bail!("config must declare at least one model");
        }
        for model in &self.models {
            if model.model_name.is_empty() {
                bail!("every model needs a modelName");
            }
            if model.completions_url.is_empty() {
                bail!("model {} needs a completionsUrl", model.model_name);
            }
            if model.max_concurrent == 0 {
                bail!("model {} needs maxConcurrent >= 1", model.model_name);
            }
        }
        if self.stream_controller.completion_timeout_ms == 0 {
            bail!("streamController.completionTimeoutMs must be positive");
        }
        Ok(())
    }

    /// First configured model; its pool is the routing default.
    pub fn default_model(&self) -> Option<&ModelConfig> {
        self.models.first()
    }
}
