//! Text hygiene for stored columns and title quality checks.

use std::sync::OnceLock;

use regex::Regex;

/// Replace control characters that Postgres text columns must not carry
/// (everything below 0x20 except tab, newline, carriage return).
pub fn sanitize_text(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            if (c as u32) < 0x20 && !matches!(c, '\t' | '\n' | '\r') {
                ' '
            } else {
                c
            }
        })
        .collect()
}

/// Truncate at a character boundary without splitting a code point.
pub fn truncate_chars(input: &str, max_chars: usize) -> &str {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

fn generic_title_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"^request for proposals?$",
            r"^request for qualifications?$",
            r"^request for information$",
            r"^request for applications?$",
            r"^invitation for bids?$",
            r"^invitation to bid$",
            r"^notice of (funding|funds) opportunity$",
            r"^notice of funding availability$",
            r"^rfp$",
            r"^rfi$",
            r"^rfa$",
            r"^rfq$",
            r"^opportunity$",
            r"^solicitation$",
        ]
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).expect("static pattern"))
        .collect()
    })
}

fn numbered_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(rfp|rfa|rfq|rfi)\s*#?\d+[-: ]+").expect("static pattern"))
}

const SUMMARY_PREAMBLES: &[&str] = &[
    "summary",
    "here is a summary",
    "here's a summary",
    "this rfp",
    "the rfp",
    "the provided rfp",
];

/// A title too vague to store: empty, tiny once stripped of quotes and a
/// trailing "(pdf)" marker, pure boilerplate, or a summary preamble.
pub fn is_generic_title(title: &str) -> bool {
    let trimmed = title
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '\u{201c}' || c == '\u{201d}')
        .trim();
    let stripped = trimmed
        .strip_suffix("(pdf)")
        .or_else(|| trimmed.strip_suffix("(PDF)"))
        .unwrap_or(trimmed)
        .trim();
    if stripped.len() < 6 {
        return true;
    }
    let lower = stripped.to_lowercase();
    if SUMMARY_PREAMBLES.iter().any(|p| lower.starts_with(p)) {
        return true;
    }
    let core = numbered_prefix().replace(stripped, "");
    let core = core.trim();
    generic_title_patterns().iter().any(|p| {
        p.find(core)
            .map(|m| m.start() == 0 && m.end() == core.len())
            .unwrap_or(false)
    })
}
