//! Outcome taxonomy: reject codes, adapter failures, HTTP mapping.

use actix_web::http::StatusCode;
use thiserror::Error;

use crate::models::CompletionStatus;

/// Why an admission filter turned a request away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCode {
    /// The acceptance model scored the request below the threshold.
    LowHiddenScore,
    /// The cursor position is not a supported completion site.
    FeatureNotSupport,
    /// `clientId` or `completionId` was missing.
    MissingIdentity,
}

impl RejectCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectCode::LowHiddenScore => "LOW_HIDDEN_SCORE",
            RejectCode::FeatureNotSupport => "FEATURE_NOT_SUPPORT",
            RejectCode::MissingIdentity => "MISSING_IDENTITY",
        }
    }
}

impl std::fmt::Display for RejectCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream adapter failure, classified per transport evidence.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("upstream returned status {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("request canceled")]
    Canceled,
    #[error("request deadline exceeded")]
    Timeout,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("unparseable upstream response: {0}")]
    Parse(String),
}

impl LlmError {
    /// Map the adapter failure onto the request outcome.
    pub fn status(&self) -> CompletionStatus {
        match self {
            LlmError::Upstream { .. } => CompletionStatus::ModelError,
            LlmError::Canceled => CompletionStatus::Canceled,
            LlmError::Timeout => CompletionStatus::Timeout,
            LlmError::Transport(_) | LlmError::Parse(_) => CompletionStatus::ServerError,
        }
    }
}

/// HTTP status returned alongside each outcome.
pub fn http_status(status: CompletionStatus) -> StatusCode {
    match status {
        CompletionStatus::Success | CompletionStatus::Empty => StatusCode::OK,
        CompletionStatus::Rejected | CompletionStatus::ReqError => StatusCode::BAD_REQUEST,
        CompletionStatus::Canceled => StatusCode::REQUEST_TIMEOUT,
        CompletionStatus::Timeout => StatusCode::GATEWAY_TIMEOUT,
        CompletionStatus::Busy => StatusCode::TOO_MANY_REQUESTS,
        CompletionStatus::ModelError | CompletionStatus::ServerError => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
