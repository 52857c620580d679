//! Markdown normalization for generated answers.

use regex::Regex;
use std::sync::LazyLock;

/// Line starts that need a blank line above them: numbered items, bullets,
/// and ATX headers.
static BLOCK_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d+\.|[*-]|#{1,6})\s").expect("valid regex"));

static MULTI_BLANK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

static MARKDOWN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\*\*[^*]+\*\*",           // bold
        r"\*[^*]+\*",               // italic
        r"(?m)^#{1,6}\s",           // header
        r"(?m)^\d+\.\s",            // numbered list
        r"(?m)^[*-]\s",             // bullet
        r"\[([^\]]+)\]\(([^)]+)\)", // link
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// Normalize spacing so list items and headers render as blocks.
///
/// Inserts a blank line before every list item or header that lacks one,
/// collapses runs of three or more newlines to two, and trims the ends.
/// Applying it to its own output changes nothing.
pub fn process_markdown_response(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let mut out = String::with_capacity(trimmed.len() + 16);
    let mut previous_blank = true;
    for (i, line) in trimmed.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
            if !previous_blank && BLOCK_START_RE.is_match(line) {
                out.push('\n');
            }
        }
        out.push_str(line);
        previous_blank = line.trim().is_empty();
    }

    MULTI_BLANK_RE.replace_all(&out, "\n\n").trim().to_string()
}

/// Whether `text` contains any recognizable markdown construct.
pub fn has_markdown_formatting(text: &str) -> bool {
    !text.is_empty() && MARKDOWN_PATTERNS.iter().any(|re| re.is_match(text))
}
