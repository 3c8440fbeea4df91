//! Prompt shaping: token-budgeted truncation, framing, stop words.
//!
//! Truncation keeps complete lines: a head-trimmed prefix starts at a line
//! boundary and a tail-trimmed suffix ends at one. Without a tokenizer the
//! prompt passes through unshaped.

use crate::config::ModelConfig;
use crate::models::ProcessedPrompt;
use crate::tokenizer::Tokenizer;

/// Built-in end-of-sentence sentinel appended to every stop list.
pub const END_OF_SENTENCE: &str = "<|endoftext|>";

/// Framed prompt ready for the upstream adapter. `suffix` is populated only
/// in non-FIM mode, where the upstream takes it as a separate field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FramedPrompt {
    pub prompt: String,
    pub suffix: Option<String>,
}

/// Truncate `prompt` in place against the model's token budgets.
pub fn shape_prompt(cfg: &ModelConfig, tokenizer: &Tokenizer, prompt: &mut ProcessedPrompt) {
    let Some(prefix_tokens) = tokenizer.count_tokens(&prompt.prefix) else {
        return; // no tokenizer: pass through unmodified
    };
    let context_tokens = tokenizer.count_tokens(&prompt.code_context).unwrap_or(0);

    if prefix_tokens + context_tokens > cfg.max_prefix_context {
        if prefix_tokens >= cfg.max_prefix_context {
            // The prefix alone fills the budget: the code context goes, and
            // the prefix keeps its newest tokens.
            prompt.code_context.clear();
            if prefix_tokens > cfg.max_prefix_context
                && let Some(tail) = tokenizer.tail_by_tokens(&prompt.prefix, cfg.max_prefix_context)
            {
                prompt.prefix = drop_first_partial_line(&tail);
            }
        } else {
            let need = prefix_tokens + context_tokens - cfg.max_prefix_context;
            if let Some(tail) = tokenizer.tail_by_tokens(&prompt.code_context, context_tokens - need)
            {
                prompt.code_context = tail;
            }
        }
    }

    if let Some(suffix_tokens) = tokenizer.count_tokens(&prompt.suffix)
        && suffix_tokens > cfg.max_suffix_context
        && let Some(head) = tokenizer.head_by_tokens(&prompt.suffix, cfg.max_suffix_context)
    {
        prompt.suffix = drop_last_partial_line(&head);
    }
}

/// Frame the shaped prompt for the upstream call.
pub fn frame_prompt(cfg: &ModelConfig, prompt: &ProcessedPrompt) -> FramedPrompt {
    if cfg.fim_mode {
        let mut framed = String::with_capacity(
            cfg.fim_begin.len()
                + prompt.code_context.len()
                + prompt.prefix.len()
                + cfg.fim_hole.len()
                + prompt.suffix.len()
                + cfg.fim_end.len()
                + 1,
        );
        framed.push_str(&cfg.fim_begin);
        if !prompt.code_context.is_empty() {
            framed.push_str(&prompt.code_context);
            framed.push('\n');
        }
        framed.push_str(&prompt.prefix);
        framed.push_str(&cfg.fim_hole);
        framed.push_str(&prompt.suffix);
        framed.push_str(&cfg.fim_end);
        FramedPrompt {
            prompt: framed,
            suffix: None,
        }
    } else {
        let framed = if prompt.code_context.is_empty() {
            prompt.prefix.clone()
        } else {
            format!("{}\n{}", prompt.code_context, prompt.prefix)
        };
        FramedPrompt {
            prompt: framed,
            suffix: (!prompt.suffix.is_empty()).then(|| prompt.suffix.clone()),
        }
    }
}

/// Stop-word list: request stops, model FIM stops, the end-of-sentence
/// sentinel, and blank-line stops when there is no suffix to run into.
pub fn assemble_stop_words(
    request_stop: &[String],
    cfg: &ModelConfig,
    shaped_suffix: &str,
) -> Vec<String> {
    let mut stops: Vec<String> = Vec::new();
    let mut push = |s: &str| {
        if !s.is_empty() && !stops.iter().any(|existing| existing == s) {
            stops.push(s.to_string());
        }
    };

    for s in request_stop {
        push(s);
    }
    for s in &cfg.fim_stop {
        push(s);
    }
    push(END_OF_SENTENCE);
    if shaped_suffix.trim().is_empty() {
        push("\n\n");
        push("\n\n\n");
    }
    stops
}

/// Drop everything up to and including the first newline, so the text
/// starts on a line boundary. No newline at all means nothing survives.
fn drop_first_partial_line(text: &str) -> String {
    match text.find('\n') {
        Some(i) => text[i + 1..].to_string(),
        None => String::new(),
    }
}

/// Drop everything after the last newline, so the text ends on a line
/// boundary. No newline at all means nothing survives.
fn drop_last_partial_line(text: &str) -> String {
    match text.rfind('\n') {
        Some(i) => text[..=i].to_string(),
        None => String::new(),
    }
}
