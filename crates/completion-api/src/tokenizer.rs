//! Tokenizer façade over tiktoken (`cl100k_base`).
//!
//! Every operation returns `Option`: `None` means no tokenizer is available
//! (disabled by config or failed to load) and callers must fall back to
//! pass-through behaviour. Token ids are an internal detail; the façade
//! exposes counting and boundary-preserving head/tail slicing.

use tiktoken_rs::{CoreBPE, cl100k_base};
use tracing::warn;

pub struct Tokenizer {
    bpe: Option<CoreBPE>,
}

impl Tokenizer {
    /// Build the façade; degrades to pass-through when loading fails.
    pub fn new(enabled: bool) -> Self {
        if !enabled {
            return Self::disabled();
        }
        match cl100k_base() {
            Ok(bpe) => Self { bpe: Some(bpe) },
            Err(e) => {
                warn!(error = %e, "tokenizer unavailable, prompt truncation disabled");
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self { bpe: None }
    }

    pub fn is_available(&self) -> bool {
        self.bpe.is_some()
    }

    pub fn count_tokens(&self, text: &str) -> Option<usize> {
        let bpe = self.bpe.as_ref()?;
        Some(bpe.encode_with_special_tokens(text).len())
    }

    /// First `max_tokens` tokens of `text`, decoded. Returns the input
    /// unchanged when it is already within budget.
    pub fn head_by_tokens(&self, text: &str, max_tokens: usize) -> Option<String> {
        let bpe = self.bpe.as_ref()?;
        let tokens = bpe.encode_with_special_tokens(text);
        if tokens.len() <= max_tokens {
            return Some(text.to_string());
        }
        match bpe.decode(tokens[..max_tokens].to_vec()) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(error = %e, "token decode failed, skipping truncation");
                None
            }
        }
    }

    /// Last `max_tokens` tokens of `text`, decoded. Returns the input
    /// unchanged when it is already within budget.
    pub fn tail_by_tokens(&self, text: &str, max_tokens: usize) -> Option<String> {
        let bpe = self.bpe.as_ref()?;
        let tokens = bpe.encode_with_special_tokens(text);
        if tokens.len() <= max_tokens {
            return Some(text.to_string());
        }
        let start = tokens.len() - max_tokens;
        match bpe.decode(tokens[start..].to_vec()) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(error = %e, "token decode failed, skipping truncation");
                None
            }
        }
    }
}
