//! Report Sanitizer
//!
//! Deterministic cleanup of generated report text: internal step, level and
//! hypothesis identifiers are removed, the whitespace they leave behind is
//! tidied, and level-2 headings are separated by a horizontal rule.

use std::sync::OnceLock;

use regex::Regex;

/// Identifiers that must never reach the final report.
pub const LEAKED_IDENTIFIER_PATTERNS: &[&str] = &[
    r"\bStep\s+\d+(?:\.\d+)?\b",
    r"\bLevel\s+\d+\b",
    r"\bHypothesis\s+\d+\b",
];

fn static_regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static sanitizer pattern"))
}

fn leaked_identifier() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternation = LEAKED_IDENTIFIER_PATTERNS.join("|");
        Regex::new(&format!(r"(?:{alternation}):?[ \t]*")).expect("static sanitizer pattern")
    })
}

fn empty_parens() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r"\([ \t]*\)")
}

fn space_before_punctuation() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r"(?m)[ \t]+([,.;:!?])([ \t]|$)")
}

fn inner_space_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r"(\S)[ \t]{2,}")
}

fn trailing_space() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r"(?m)[ \t]+$")
}

fn level_two_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r"(?m)^## ")
}

fn repeated_rule() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r"(?m)^---[ \t]*\n(?:[ \t]*\n)*---\n")
}

fn blank_line_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r"\n{3,}")
}

/// Clean a generated report.
pub fn sanitize_report(text: &str) -> String {
    let text = leaked_identifier().replace_all(text, "");
    let text = empty_parens().replace_all(&text, "");
    let text = space_before_punctuation().replace_all(&text, "${1}${2}");
    let text = inner_space_run().replace_all(&text, "${1} ");
    let text = trailing_space().replace_all(&text, "");

    let text = level_two_heading().replace_all(&text, "---\n## ");
    let text = repeated_rule().replace_all(&text, "---\n");
    let text = blank_line_run().replace_all(&text, "\n\n");

    let trimmed = text.trim();
    trimmed
        .strip_prefix("---\n")
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}
