//! Cursor-position heuristics.
//!
//! Automatic completions are pointless at certain cursor positions: just
//! after a finished statement, or in the middle of an identifier the user is
//! still typing. Both cases reject with `FEATURE_NOT_SUPPORT`. Manual
//! triggers bypass the check.

use crate::errors::RejectCode;
use crate::filters::{AdmissionFilter, Verdict};
use crate::models::{CompletionRequest, ProcessedPrompt, TriggerMode};

/// Characters that close a statement or block when they end the line.
const LINE_END_CHARS: [char; 4] = ['>', ';', '}', ')'];

pub struct LanguageFeatureFilter;

impl AdmissionFilter for LanguageFeatureFilter {
    fn name(&self) -> &'static str {
        "language_feature"
    }

    fn judge(&self, req: &mut CompletionRequest, prompt: &ProcessedPrompt) -> Verdict {
        if req.trigger_mode == TriggerMode::Manual {
            return Verdict::Accepted;
        }

        let left = prompt.cursor_line_prefix.trim_end();
        let right = &prompt.cursor_line_suffix;

        // Cursor sits after a syntactically finished line.
        if right.trim().is_empty()
            && left.chars().last().is_some_and(|c| LINE_END_CHARS.contains(&c))
        {
            return Verdict::Rejected(RejectCode::FeatureNotSupport);
        }

        // Cursor sits inside an identifier the user is still typing.
        if right.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
            return Verdict::Rejected(RejectCode::FeatureNotSupport);
        }

        Verdict::Accepted
    }
}
