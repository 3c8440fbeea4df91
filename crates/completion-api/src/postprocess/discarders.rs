//! Discarders: post-processors that reject a completion entirely.
//!
//! The first discarder that fires empties the text and settles the outcome
//! as `Empty`; cutters never run afterwards.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::language::Lang;
use crate::postprocess::brackets::is_valid_brackets;
use crate::postprocess::repetition::longest_common_substring;
use crate::postprocess::syntax::{nearest_block, parses_clean};
use crate::postprocess::{PostProcessor, ProcessContext, ProcessorKind};

/// Repeated-structure threshold: a shared substring must be longer than
/// this to count as structural repetition.
const MIN_LCS_LEN: usize = 5;
/// Column-anchored recurrences beyond this always trigger.
const MAX_REPEATED_LINES: usize = 8;

/// Detects degenerate output where the model loops on one line shape.
///
/// Looks for a long common substring between consecutive lines and counts
/// how many subsequent lines repeat it at the same column.
pub struct DiscardExtremeRepetition;

impl PostProcessor for DiscardExtremeRepetition {
    fn name(&self) -> &'static str {
        "discard_extreme_repetition"
    }

    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Discarder
    }

    fn process(&self, ctx: &mut ProcessContext<'_>) -> bool {
        let lines: Vec<Vec<char>> = ctx
            .text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| line.chars().collect())
            .collect();
        if lines.len() < 3 {
            return false;
        }

        for i in 0..lines.len() - 1 {
            let a: String = lines[i].iter().collect();
            let b: String = lines[i + 1].iter().collect();
            let (column, len) = longest_common_substring(&a, &b);
            if len <= MIN_LCS_LEN || len * 2 < lines[i].len() {
                continue;
            }

            let needle = &lines[i][column..column + len];
            let recurrences = lines[i + 1..]
                .iter()
                .filter(|line| line.len() >= column + len && &line[column..column + len] == needle)
                .count();

            if recurrences > MAX_REPEATED_LINES || recurrences * 2 > lines.len() {
                return true;
            }
        }
        false
    }
}

/// Rejects completions that are visibly Python when the target is not.
pub struct DiscardWrongLanguage {
    python_signatures: Vec<String>,
}

impl DiscardWrongLanguage {
    pub fn new(python_signatures: Vec<String>) -> Self {
        Self { python_signatures }
    }
}

impl PostProcessor for DiscardWrongLanguage {
    fn name(&self) -> &'static str {
        "discard_wrong_language"
    }

    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Discarder
    }

    fn process(&self, ctx: &mut ProcessContext<'_>) -> bool {
        if ctx.language.is_empty() || Lang::from_language_id(ctx.language) == Lang::Python {
            return false;
        }
        self.python_signatures
            .iter()
            .any(|signature| !signature.is_empty() && ctx.text.contains(signature))
    }
}

/// Rejects completions whose own brackets do not balance.
///
/// Registered but outside the default chain; opt in through
/// `customPruners`.
pub struct DiscardInvalidBrackets;

impl PostProcessor for DiscardInvalidBrackets {
    fn name(&self) -> &'static str {
        "discard_invalid_brackets"
    }

    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Discarder
    }

    fn process(&self, ctx: &mut ProcessContext<'_>) -> bool {
        !is_valid_brackets(&ctx.text)
    }
}

static CSS_PROPERTY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*-?[a-zA-Z][a-zA-Z0-9-]*\s*:\s*[^;{}]+;?\s*$").expect("valid regex")
});
static CSS_SELECTOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*[.#&]?[a-zA-Z0-9_.,:#\s>~+*\[\]='"-]+\{\s*$"#).expect("valid regex")
});
static CSS_CLOSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\}\s*$").expect("valid regex"));

/// Share of CSS-looking lines beyond which a completion is considered
/// style-sheet bleed-through.
const CSS_LINE_RATIO: f64 = 0.7;

/// Rejects stylesheet output leaking into markup or script completions.
pub struct DiscardCssBleed;

impl PostProcessor for DiscardCssBleed {
    fn name(&self) -> &'static str {
        "discard_css_style"
    }

    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Discarder
    }

    fn process(&self, ctx: &mut ProcessContext<'_>) -> bool {
        let lang = Lang::from_language_id(ctx.language);
        if !lang.is_front_end() || lang == Lang::Css {
            return false;
        }

        let lines: Vec<&str> = ctx
            .text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .collect();
        if lines.is_empty() {
            return false;
        }

        let css_like = lines
            .iter()
            .filter(|line| {
                CSS_PROPERTY_RE.is_match(line)
                    || CSS_SELECTOR_RE.is_match(line)
                    || CSS_CLOSE_RE.is_match(line)
            })
            .count();

        css_like as f64 / lines.len() as f64 > CSS_LINE_RATIO
    }
}

/// Rejects completions that break the syntax of the surrounding block.
///
/// The check only applies when the surroundings parse cleanly on their own;
/// a fragmentary cursor position makes the completion unverifiable, not
/// invalid.
pub struct DiscardSyntaxError;

impl PostProcessor for DiscardSyntaxError {
    fn name(&self) -> &'static str {
        "discard_syntax_error"
    }

    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Discarder
    }

    fn process(&self, ctx: &mut ProcessContext<'_>) -> bool {
        let lang = Lang::from_language_id(ctx.language);
        let (block_prefix, block_suffix) = nearest_block(ctx.prefix, ctx.suffix);
        if block_prefix.trim().is_empty() && block_suffix.trim().is_empty() {
            // No surrounding code to validate against; a bare fragment is
            // rarely a complete compilation unit.
            return false;
        }

        let baseline = format!("{block_prefix}{block_suffix}");
        if parses_clean(lang, &baseline) != Some(true) {
            return false;
        }

        let assembled = format!("{block_prefix}{}{block_suffix}", ctx.text);
        parses_clean(lang, &assembled) == Some(false)
    }
}
