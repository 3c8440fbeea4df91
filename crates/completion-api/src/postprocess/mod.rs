//! Post-processing of upstream completions.
//!
//! Two ordered processor lists run against the returned text: *discarders*
//! first (the first match empties the completion), then *cutters* (each may
//! trim it; all of them run). Processors are closed-set trait objects held
//! in a name-keyed registry, so a model config can assemble a custom chain
//! with `customPruners` or switch pruning off with `disablePrune`.

mod brackets;
mod cutters;
mod discarders;
mod repetition;
mod syntax;

pub use brackets::is_valid_brackets;

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use completion_gateway_core::observability::record_processor_fired;

use crate::config::{CompletionsConfig, ModelConfig};
use crate::models::ProcessedPrompt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorKind {
    Discarder,
    Cutter,
}

/// Working state handed through the chain.
pub struct ProcessContext<'a> {
    /// The completion text; cutters mutate it in place.
    pub text: String,
    /// Shaped prefix of the surrounding source.
    pub prefix: &'a str,
    /// Shaped suffix of the surrounding source.
    pub suffix: &'a str,
    pub language: &'a str,
    /// Names of processors that fired, for verbose diagnostics.
    pub fired: Vec<&'static str>,
}

pub trait PostProcessor: Send + Sync {
    fn name(&self) -> &'static str;
    fn kind(&self) -> ProcessorKind;
    /// Inspect (and for cutters, mutate) the completion. Returns whether
    /// the processor fired.
    fn process(&self, ctx: &mut ProcessContext<'_>) -> bool;
}

/// Result of running the chain.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    pub text: String,
    /// True when a discarder emptied the completion.
    pub discarded: bool,
    pub fired: Vec<String>,
}

/// All known processors, keyed by name.
pub struct ProcessorRegistry {
    processors: HashMap<&'static str, Arc<dyn PostProcessor>>,
}

/// Default chain order. `discard_invalid_brackets` is registered but kept
/// out of the defaults; configs opt in through `customPruners`.
const DEFAULT_CHAIN: [&str; 8] = [
    "discard_extreme_repetition",
    "discard_wrong_language",
    "discard_css_style",
    "discard_syntax_error",
    "cut_repetitive_text",
    "cut_prefix_overlap",
    "cut_suffix_overlap",
    "cut_syntax_error",
];

impl ProcessorRegistry {
    pub fn with_defaults(cfg: &CompletionsConfig) -> Self {
        let mut registry = Self {
            processors: HashMap::new(),
        };
        registry.register(Arc::new(discarders::DiscardExtremeRepetition));
        registry.register(Arc::new(discarders::DiscardWrongLanguage::new(
            cfg.python_signatures.clone(),
        )));
        registry.register(Arc::new(discarders::DiscardInvalidBrackets));
        registry.register(Arc::new(discarders::DiscardCssBleed));
        registry.register(Arc::new(discarders::DiscardSyntaxError));
        registry.register(Arc::new(cutters::CutRepetitiveText));
        registry.register(Arc::new(cutters::CutPrefixOverlap));
        registry.register(Arc::new(cutters::CutSuffixOverlap));
        registry.register(Arc::new(cutters::CutSyntaxError));
        registry
    }

    fn register(&mut self, processor: Arc<dyn PostProcessor>) {
        self.processors.insert(processor.name(), processor);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PostProcessor>> {
        self.processors.get(name).cloned()
    }

    /// Assemble the chain for one model: `disablePrune` yields an inert
    /// chain, `customPruners` selects by name (unknown names are logged and
    /// skipped), anything else gets the defaults.
    pub fn build_chain(&self, model: &ModelConfig) -> PostProcessChain {
        if model.disable_prune {
            return PostProcessChain::disabled();
        }

        let names: Vec<&str> = if model.custom_pruners.is_empty() {
            DEFAULT_CHAIN.to_vec()
        } else {
            model.custom_pruners.iter().map(String::as_str).collect()
        };

        let mut discarders = Vec::new();
        let mut cutters = Vec::new();
        for name in names {
            match self.get(name) {
                Some(processor) => match processor.kind() {
                    ProcessorKind::Discarder => discarders.push(processor),
                    ProcessorKind::Cutter => cutters.push(processor),
                },
                None => {
                    warn!(model = %model.model_name, pruner = name, "unknown pruner in config, skipping");
                }
            }
        }

        PostProcessChain {
            discarders,
            cutters,
            enabled: true,
        }
    }
}

/// An assembled, per-model chain.
pub struct PostProcessChain {
    discarders: Vec<Arc<dyn PostProcessor>>,
    cutters: Vec<Arc<dyn PostProcessor>>,
    enabled: bool,
}

impl PostProcessChain {
    pub fn disabled() -> Self {
        Self {
            discarders: Vec::new(),
            cutters: Vec::new(),
            enabled: false,
        }
    }

    /// Run the chain. The outcome text is right-trimmed; an empty result
    /// maps to the `Empty` status upstream.
    pub fn run(&self, text: String, prompt: &ProcessedPrompt, language: &str) -> ProcessOutcome {
        let mut ctx = ProcessContext {
            text,
            prefix: &prompt.prefix,
            suffix: &prompt.suffix,
            language,
            fired: Vec::new(),
        };
        let mut discarded = false;

        if self.enabled && !ctx.text.is_empty() {
            for discarder in &self.discarders {
                if discarder.process(&mut ctx) {
                    debug!(processor = discarder.name(), "completion discarded");
                    record_processor_fired(discarder.name());
                    ctx.fired.push(discarder.name());
                    ctx.text.clear();
                    discarded = true;
                    break;
                }
            }

            if !discarded {
                for cutter in &self.cutters {
                    if ctx.text.is_empty() {
                        break;
                    }
                    if cutter.process(&mut ctx) {
                        debug!(processor = cutter.name(), "completion trimmed");
                        record_processor_fired(cutter.name());
                        ctx.fired.push(cutter.name());
                    }
                }
            }
        }

        ProcessOutcome {
            text: ctx.text.trim_end().to_string(),
            discarded,
            fired: ctx.fired.iter().map(|name| name.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ProcessorRegistry {
        ProcessorRegistry::with_defaults(&CompletionsConfig::default())
    }

    fn default_chain() -> PostProcessChain {
        registry().build_chain(&ModelConfig {
            model_name: "m".to_string(),
            completions_url: "http://llm/v1/completions".to_string(),
            ..ModelConfig::default()
        })
    }

    fn prompt(prefix: &str, suffix: &str) -> ProcessedPrompt {
        ProcessedPrompt {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            ..ProcessedPrompt::default()
        }
    }

    #[test]
    fn test_registry_knows_all_processors() {
        let registry = registry();
        for name in DEFAULT_CHAIN {
            assert!(registry.get(name).is_some(), "missing {name}");
        }
        assert!(registry.get("discard_invalid_brackets").is_some());
        assert!(registry.get("no_such_processor").is_none());
    }

    #[test]
    fn test_default_chain_excludes_bracket_discarder() {
        let chain = default_chain();
        assert!(
            !chain
                .discarders
                .iter()
                .any(|d| d.name() == "discard_invalid_brackets")
        );
        assert_eq!(chain.discarders.len(), 4);
        assert_eq!(chain.cutters.len(), 4);
    }

    #[test]
    fn test_custom_pruners_select_by_name() {
        let chain = registry().build_chain(&ModelConfig {
            model_name: "m".to_string(),
            completions_url: "http://llm/v1/completions".to_string(),
            custom_pruners: vec![
                "discard_invalid_brackets".to_string(),
                "cut_suffix_overlap".to_string(),
                "bogus".to_string(),
            ],
            ..ModelConfig::default()
        });
        assert_eq!(chain.discarders.len(), 1);
        assert_eq!(chain.cutters.len(), 1);
    }

    #[test]
    fn test_disable_prune_passes_text_through() {
        let chain = registry().build_chain(&ModelConfig {
            model_name: "m".to_string(),
            completions_url: "http://llm/v1/completions".to_string(),
            disable_prune: true,
            ..ModelConfig::default()
        });
        let text = vec!["total += value_of(item);"; 12].join("\n");
        let outcome = chain.run(text.clone(), &prompt("", ""), "rust");
        assert!(!outcome.discarded);
        assert_eq!(outcome.text, text);
        assert!(outcome.fired.is_empty());
    }

    #[test]
    fn test_discard_stops_the_chain() {
        let chain = default_chain();
        let text = vec!["total += value_of(item);"; 12].join("\n");
        let outcome = chain.run(text, &prompt("", ""), "rust");
        assert!(outcome.discarded);
        assert!(outcome.text.is_empty());
        assert_eq!(outcome.fired, vec!["discard_extreme_repetition"]);
    }

    #[test]
    fn test_right_trim_always_applies() {
        let chain = default_chain();
        let outcome = chain.run("let x = 1;   \n\n".to_string(), &prompt("", ""), "rust");
        assert_eq!(outcome.text, "let x = 1;");
        assert!(!outcome.discarded);
    }

    #[test]
    fn test_chain_is_idempotent() {
        let chain = default_chain();
        let p = prompt("fn main() {\n    let a = 1;\n", "\n}\n");
        let text =
            "    let alpha = base + offset;\n    let beta = alpha * 2;\n    emit(beta);".to_string();

        let once = chain.run(text, &p, "rust");
        assert!(!once.discarded);
        assert!(!once.text.is_empty());
        let twice = chain.run(once.text.clone(), &p, "rust");
        assert_eq!(once.text, twice.text);

        // A discarded completion stays empty on the second run.
        let looping = vec!["total += value_of(item);"; 12].join("\n");
        let first = chain.run(looping, &p, "rust");
        assert!(first.discarded);
        let second = chain.run(first.text.clone(), &p, "rust");
        assert_eq!(second.text, "");
    }

    #[test]
    fn test_empty_input_short_circuits() {
        let chain = default_chain();
        let outcome = chain.run(String::new(), &prompt("x", "y"), "rust");
        assert_eq!(outcome.text, "");
        assert!(!outcome.discarded);
        assert!(outcome.fired.is_empty());
    }
}
