//! Wire types and working state for the completion lifecycle.
//!
//! The editor-facing API speaks camelCase JSON; the structures here are the
//! single source of truth for that contract. `ProcessedPrompt` is the mutable
//! working copy the lifecycle shapes and post-processes against.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// How the editor initiated the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum TriggerMode {
    /// Explicitly requested by the user; admission filters are bypassed.
    Manual,
    /// Fired automatically while typing.
    #[default]
    Auto,
    /// Continuation of a previously accepted completion.
    Continue,
}

/// Prompt fields supplied by the editor around the cursor.
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptOptions {
    /// Source text before the cursor.
    pub prefix: String,
    /// Source text after the cursor.
    pub suffix: String,
    /// Portion of the cursor line before the cursor.
    pub cursor_line_prefix: String,
    /// Portion of the cursor line after the cursor.
    pub cursor_line_suffix: String,
    /// Pre-supplied code-base context, if the editor already has some.
    pub code_context: String,
}

/// Signals for the acceptance-probability model.
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct HideScoreInput {
    pub is_whitespace_after_cursor: bool,
    /// Length of the whole document in characters.
    pub document_length: u64,
    /// Cursor position within the document.
    pub prompt_end_pos: u64,
    /// 1 when the previous suggestion was accepted, 0 otherwise.
    pub previous_label: i64,
    /// Unix-millis timestamp of the previous labelling event.
    pub previous_label_timestamp_ms: i64,
}

/// A code-completion request from an editor client.
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionRequest {
    /// Model tag or exact model name; empty selects the default pool.
    pub model: String,
    /// Raw prompt; used as the prefix when `promptOptions` is absent.
    pub prompt: String,
    pub prompt_options: Option<PromptOptions>,
    pub language_id: String,
    pub client_id: String,
    pub completion_id: String,
    /// Code-base root on the client machine.
    pub project_path: String,
    /// Path of the edited file relative to the project.
    pub file_project_path: String,
    /// Import block of the edited file, prepended to the code context.
    pub import_content: String,
    pub temperature: Option<f32>,
    pub trigger_mode: TriggerMode,
    pub stop: Vec<String>,
    /// Include diagnostics in the response.
    pub verbose: bool,
    /// Free-form passthrough; diagnostics such as the hidden score are
    /// written back here.
    #[schema(value_type = Object)]
    pub extra: serde_json::Map<String, Value>,
    pub calculate_hide_score: Option<HideScoreInput>,
}

/// Mutable working copy of the prompt fields.
///
/// Derived cursor-line fields are filled from `prefix`/`suffix` when the
/// editor did not supply them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessedPrompt {
    pub prefix: String,
    pub suffix: String,
    pub cursor_line_prefix: String,
    pub cursor_line_suffix: String,
    pub code_context: String,
}

impl ProcessedPrompt {
    pub fn from_request(req: &CompletionRequest) -> Self {
        let mut p = match &req.prompt_options {
            Some(options) => Self {
                prefix: options.prefix.clone(),
                suffix: options.suffix.clone(),
                cursor_line_prefix: options.cursor_line_prefix.clone(),
                cursor_line_suffix: options.cursor_line_suffix.clone(),
                code_context: options.code_context.clone(),
            },
            None => Self {
                prefix: req.prompt.clone(),
                ..Self::default()
            },
        };

        if p.cursor_line_prefix.is_empty() {
            p.cursor_line_prefix = p.prefix.rsplit('\n').next().unwrap_or_default().to_string();
        }
        if p.cursor_line_suffix.is_empty() {
            p.cursor_line_suffix = p.suffix.split('\n').next().unwrap_or_default().to_string();
        }
        p
    }
}

/// Per-request timing and token accounting, all durations in milliseconds.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Perf {
    /// Unix-millis at which the request was received.
    pub receive_time_ms: i64,
    pub context_duration_ms: u64,
    pub queue_duration_ms: u64,
    pub llm_duration_ms: u64,
    pub total_duration_ms: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Final classification of a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    /// Non-empty post-processed text.
    Success,
    /// Upstream answered but the text was empty or wholly discarded.
    Empty,
    /// An admission filter fired or required identifiers were missing.
    Rejected,
    /// No eligible model pool.
    Busy,
    /// Superseded by a newer request from the same client.
    Canceled,
    /// The per-request deadline expired.
    Timeout,
    /// Malformed input reached the upstream adapter.
    ReqError,
    /// Upstream returned a non-2xx response.
    ModelError,
    /// Transport or parse failure not attributable to the upstream status.
    ServerError,
}

impl CompletionStatus {
    /// Stable lowercase name, used as a metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionStatus::Success => "success",
            CompletionStatus::Empty => "empty",
            CompletionStatus::Rejected => "rejected",
            CompletionStatus::Busy => "busy",
            CompletionStatus::Canceled => "canceled",
            CompletionStatus::Timeout => "timeout",
            CompletionStatus::ReqError => "req_error",
            CompletionStatus::ModelError => "model_error",
            CompletionStatus::ServerError => "server_error",
        }
    }
}

impl std::fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct CompletionChoice {
    pub text: String,
}

/// OpenAI-style token accounting.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Diagnostics returned when the request asked for `verbose`.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerboseInfo {
    /// Model the registry routed the request to.
    pub selected_model: String,
    /// Acceptance-model score, when the hidden-score filter ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hide_score: Option<f64>,
    /// Post-processors that fired, in order.
    pub fired_processors: Vec<String>,
    /// Upstream text before post-processing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    /// Stop words sent upstream.
    pub stop_words: Vec<String>,
    pub perf: Perf,
}

/// Response returned for every completion request, success or not.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CompletionResponse {
    pub id: String,
    pub model: String,
    pub object: String,
    pub choices: Vec<CompletionChoice>,
    /// Unix-seconds creation timestamp.
    pub created: i64,
    pub usage: Usage,
    pub status: CompletionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<VerboseInfo>,
}

impl CompletionResponse {
    pub fn new(model: &str, status: CompletionStatus) -> Self {
        Self {
            id: format!("cmpl-{}", uuid::Uuid::new_v4()),
            model: model.to_string(),
            object: "text_completion".to_string(),
            choices: Vec::new(),
            created: chrono::Utc::now().timestamp(),
            usage: Usage::default(),
            status,
            error: None,
            verbose: None,
        }
    }

    pub fn with_text(mut self, text: String) -> Self {
        self.choices = vec![CompletionChoice { text }];
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_verbose(mut self, verbose: Option<VerboseInfo>) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn text(&self) -> &str {
        self.choices.first().map(|c| c.text.as_str()).unwrap_or("")
    }
}
