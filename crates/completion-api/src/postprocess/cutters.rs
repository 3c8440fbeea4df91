//! Cutters: post-processors that trim a completion without rejecting it.
//!
//! Every cutter in the chain runs, in order, regardless of how many fired
//! before it.

use crate::postprocess::repetition::trailing_repeat_len;
use crate::postprocess::syntax::{nearest_block, parses_clean};
use crate::postprocess::{PostProcessor, ProcessContext, ProcessorKind};
use crate::language::Lang;

/// Lines to slide while matching overlap against the surrounding source.
const CUT_LINES: usize = 3;
/// Completion lines considered for prefix-overlap matching.
const MAX_MATCH_LINES: usize = 10;
/// Consecutive matching lines that prove a prefix echo.
const MIN_CONSECUTIVE_MATCHES: usize = 3;
/// Matched-line ratio that proves a prefix echo.
const MATCH_RATIO: f64 = 0.6;
/// Suffix overlaps at or below this length are left alone.
const IGNORE_OVERLAP_LEN: usize = 8;
/// Share of the text that must re-occur for the repetitive-tail cut.
const REPEAT_RATIO: f64 = 0.15;

/// Cuts a repeating tail detected through the KMP prefix function of the
/// reversed completion.
pub struct CutRepetitiveText;

impl PostProcessor for CutRepetitiveText {
    fn name(&self) -> &'static str {
        "cut_repetitive_text"
    }

    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Cutter
    }

    fn process(&self, ctx: &mut ProcessContext<'_>) -> bool {
        if ctx.text.lines().count() < 3 {
            return false;
        }
        let total_chars = ctx.text.chars().count();
        if total_chars == 0 {
            return false;
        }

        let repeat = trailing_repeat_len(&ctx.text);
        if repeat == 0 || (repeat as f64) / (total_chars as f64) < REPEAT_RATIO {
            return false;
        }

        ctx.text = ctx.text.chars().take(total_chars - repeat).collect();
        true
    }
}

/// Drops completions that echo the last lines of the prefix.
///
/// Lines are compared with all whitespace removed. A window of prefix lines
/// slides up to `CUT_LINES` positions; the completion is dropped when at
/// least `MIN_CONSECUTIVE_MATCHES` lines match in a row or the matched
/// ratio reaches `MATCH_RATIO`.
pub struct CutPrefixOverlap;

impl PostProcessor for CutPrefixOverlap {
    fn name(&self) -> &'static str {
        "cut_prefix_overlap"
    }

    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Cutter
    }

    fn process(&self, ctx: &mut ProcessContext<'_>) -> bool {
        let completion_lines: Vec<String> = ctx
            .text
            .lines()
            .take(MAX_MATCH_LINES)
            .map(strip_whitespace)
            .filter(|line| !line.is_empty())
            .collect();
        if completion_lines.is_empty() {
            return false;
        }

        let prefix_lines: Vec<String> = ctx
            .prefix
            .lines()
            .map(strip_whitespace)
            .filter(|line| !line.is_empty())
            .collect();
        if prefix_lines.is_empty() {
            return false;
        }

        for slide in 0..=CUT_LINES {
            let window_end = prefix_lines.len().checked_sub(slide);
            let Some(window_end) = window_end else { break };
            let window_start = window_end.saturating_sub(completion_lines.len());
            let window = &prefix_lines[window_start..window_end];
            if window.is_empty() {
                continue;
            }

            let mut matched = 0usize;
            let mut consecutive = 0usize;
            let mut best_consecutive = 0usize;
            for (completion_line, prefix_line) in completion_lines.iter().zip(window.iter()) {
                if completion_line == prefix_line {
                    matched += 1;
                    consecutive += 1;
                    best_consecutive = best_consecutive.max(consecutive);
                } else {
                    consecutive = 0;
                }
            }

            let ratio = matched as f64 / completion_lines.len() as f64;
            let echo = best_consecutive >= MIN_CONSECUTIVE_MATCHES
                || (matched >= 2 && ratio >= MATCH_RATIO);
            if echo {
                ctx.text.clear();
                return true;
            }
        }
        false
    }
}

/// Trims the tail of the completion when it reproduces the head of the
/// suffix, sliding up to `CUT_LINES` lines into the suffix.
pub struct CutSuffixOverlap;

impl PostProcessor for CutSuffixOverlap {
    fn name(&self) -> &'static str {
        "cut_suffix_overlap"
    }

    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Cutter
    }

    fn process(&self, ctx: &mut ProcessContext<'_>) -> bool {
        let mut suffix = ctx.suffix;
        for _ in 0..=CUT_LINES {
            if suffix.is_empty() || ctx.text.is_empty() {
                break;
            }

            let longest = longest_tail_head_overlap(&ctx.text, suffix);
            if longest > IGNORE_OVERLAP_LEN {
                let keep = ctx.text.len() - longest;
                ctx.text.truncate(keep);
                return true;
            }

            match suffix.find('\n') {
                Some(newline) => suffix = &suffix[newline + 1..],
                None => break,
            }
        }
        false
    }
}

/// Longest `j` such that the completion ends with the first `j` bytes of
/// the suffix.
fn longest_tail_head_overlap(text: &str, suffix: &str) -> usize {
    let max = text.len().min(suffix.len());
    for j in (1..=max).rev() {
        if !suffix.is_char_boundary(j) {
            continue;
        }
        if text.ends_with(&suffix[..j]) {
            return j;
        }
    }
    0
}

/// Tries progressively shorter completions until one parses cleanly.
///
/// At most the length of the last non-empty line is dropped, one character
/// at a time; the first cut that parses wins.
pub struct CutSyntaxError;

impl PostProcessor for CutSyntaxError {
    fn name(&self) -> &'static str {
        "cut_syntax_error"
    }

    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Cutter
    }

    fn process(&self, ctx: &mut ProcessContext<'_>) -> bool {
        let lang = Lang::from_language_id(ctx.language);
        let (block_prefix, block_suffix) = nearest_block(ctx.prefix, ctx.suffix);
        if block_prefix.trim().is_empty() && block_suffix.trim().is_empty() {
            return false;
        }

        let assembled = format!("{block_prefix}{}{block_suffix}", ctx.text);
        match parses_clean(lang, &assembled) {
            Some(false) => {}
            // Already clean, or unverifiable: nothing to trim.
            Some(true) | None => return false,
        }

        let chars: Vec<char> = ctx.text.chars().collect();
        let last_line_len = ctx
            .text
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map(|line| line.chars().count())
            .unwrap_or(0);

        for cut in 1..=last_line_len.min(chars.len()) {
            let candidate: String = chars[..chars.len() - cut].iter().collect();
            let assembled = format!("{block_prefix}{candidate}{block_suffix}");
            if parses_clean(lang, &assembled) == Some(true) {
                ctx.text = candidate;
                return true;
            }
        }
        false
    }
}

fn strip_whitespace(line: &str) -> String {
    line.chars().filter(|c| !c.is_whitespace()).collect()
}
