//! Admission filtering.
//!
//! An ordered chain of filters runs before any expensive work; the first
//! non-accepting verdict wins and maps to the `Rejected` outcome.

mod hidden_score;
mod language_feature;

pub use hidden_score::HiddenScoreFilter;
pub use language_feature::LanguageFeatureFilter;

use tracing::debug;

use completion_gateway_core::observability::record_filter_reject;

use crate::config::CompletionsConfig;
use crate::errors::RejectCode;
use crate::models::{CompletionRequest, ProcessedPrompt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected(RejectCode),
}

pub trait AdmissionFilter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Judge the request. Filters may write diagnostics back into
    /// `req.extra`.
    fn judge(&self, req: &mut CompletionRequest, prompt: &ProcessedPrompt) -> Verdict;
}

pub struct FilterChain {
    filters: Vec<Box<dyn AdmissionFilter>>,
}

impl FilterChain {
    pub fn with_defaults(cfg: &CompletionsConfig) -> Self {
        Self {
            filters: vec![
                Box::new(HiddenScoreFilter::new(cfg.hide_score_threshold)),
                Box::new(LanguageFeatureFilter),
            ],
        }
    }

    pub fn judge(&self, req: &mut CompletionRequest, prompt: &ProcessedPrompt) -> Verdict {
        for filter in &self.filters {
            if let Verdict::Rejected(code) = filter.judge(req, prompt) {
                debug!(
                    filter = filter.name(),
                    code = code.as_str(),
                    completion_id = %req.completion_id,
                    "request rejected by admission filter"
                );
                record_filter_reject(code.as_str());
                return Verdict::Rejected(code);
            }
        }
        Verdict::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TriggerMode;

    struct AlwaysReject;
    impl AdmissionFilter for AlwaysReject {
        fn name(&self) -> &'static str {
            "always_reject"
        }
        fn judge(&self, _: &mut CompletionRequest, _: &ProcessedPrompt) -> Verdict {
            Verdict::Rejected(RejectCode::FeatureNotSupport)
        }
    }

    #[test]
    fn test_first_rejection_wins() {
        let chain = FilterChain {
            filters: vec![Box::new(AlwaysReject)],
        };
        let mut req = CompletionRequest::default();
        let prompt = ProcessedPrompt::default();
        assert_eq!(
            chain.judge(&mut req, &prompt),
            Verdict::Rejected(RejectCode::FeatureNotSupport)
        );
    }

    #[test]
    fn test_manual_trigger_passes_default_chain() {
        // A manual one-line prompt with no hide-score payload sails through
        // regardless of thresholds.
        let chain = FilterChain::with_defaults(&CompletionsConfig {
            hide_score_threshold: 1.0,
            ..CompletionsConfig::default()
        });
        let mut req = CompletionRequest {
            trigger_mode: TriggerMode::Manual,
            prompt: "x =".to_string(),
            ..CompletionRequest::default()
        };
        let prompt = ProcessedPrompt::from_request(&req.clone());
        assert_eq!(chain.judge(&mut req, &prompt), Verdict::Accepted);
    }
}
