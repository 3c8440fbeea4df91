//! Syntax checking support for the post-processors.
//!
//! Completions are validated by parsing `nearest-block prefix + completion +
//! nearest-block suffix` with the language's tree-sitter grammar. The
//! nearest-block extraction keeps the parse input small and local to the
//! cursor.

use tree_sitter::Parser;

use crate::language::Lang;

/// Lines considered on each side of the cursor during block extraction.
const MAX_BLOCK_LINES: usize = 60;

/// Whether `lang` can be syntax-checked at all.
pub fn supports_language(lang: Lang) -> bool {
    lang.tree_sitter_language().is_some()
}

/// Parse `source` with the grammar for `lang`.
///
/// `Some(true)` means the tree has no errors; `None` means the language has
/// no grammar or the parser could not run, in which case callers must treat
/// the text as unverifiable rather than invalid.
pub fn parses_clean(lang: Lang, source: &str) -> Option<bool> {
    let language = lang.tree_sitter_language()?;
    let mut parser = Parser::new();
    parser.set_language(&language).ok()?;
    let tree = parser.parse(source, None)?;
    Some(!tree.root_node().has_error())
}

/// Extract the code surrounding the cursor: from the start of the nearest
/// enclosing top-level block through the end of it.
///
/// Block boundaries are approximated by indentation: a non-empty line with
/// no leading whitespace starts a top-level item. The extraction is capped
/// on both sides so pathological files stay cheap to parse.
pub fn nearest_block(prefix: &str, suffix: &str) -> (String, String) {
    let prefix_lines: Vec<&str> = prefix.split('\n').collect();
    let mut start = prefix_lines.len().saturating_sub(1);
    for (index, line) in prefix_lines
        .iter()
        .enumerate()
        .rev()
        .take(MAX_BLOCK_LINES)
    {
        start = index;
        if is_top_level_start(line) {
            break;
        }
    }
    let block_prefix = prefix_lines[start..].join("\n");

    let suffix_lines: Vec<&str> = suffix.split('\n').collect();
    let mut end = 0;
    for (index, line) in suffix_lines.iter().enumerate().take(MAX_BLOCK_LINES) {
        end = index + 1;
        // A fresh top-level item after the first line closes the block.
        if index > 0 && is_top_level_start(line) {
            end = index;
            break;
        }
    }
    let block_suffix = suffix_lines[..end].join("\n");

    (block_prefix, block_suffix)
}

/// A line that plausibly starts a top-level item: non-empty, not indented,
/// and not a continuation or closing delimiter.
fn is_top_level_start(line: &str) -> bool {
    let Some(first) = line.chars().next() else {
        return false;
    };
    if first.is_whitespace() {
        return false;
    }
    !matches!(first, '}' | ')' | ']' | '.' | ',')
}
