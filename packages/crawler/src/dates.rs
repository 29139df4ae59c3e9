//! Heuristic deadline detection used to drop clearly-expired candidates
//! before spending navigation and model calls on them.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

const KEYWORDS: &str = r"(?:due\s*(?:date|by|on)?|deadline|closing\s*date|applications?\s*due|submissions?\s*due|responses?\s*due|proposals?\s*due|bids?\s*due|submission\s*deadline|expiration\s*date)";

const DATE_FORMATS: &[&str] = &[
    "%B %d, %Y",
    "%b %d, %Y",
    "%m/%d/%Y",
    "%m/%d/%y",
    "%Y-%m-%d",
    "%d %B %Y",
    "%d %b %Y",
    "%m-%d-%Y",
    "%m-%d-%y",
];

fn deadline_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"([A-Za-z]{3,9}\s+\d{1,2},\s*\d{4})",
            r"(\d{1,2}[-/]\d{1,2}[-/]\d{2,4})",
            r"(\d{4}-\d{2}-\d{2})",
            r"(\d{1,2}\s+[A-Za-z]{3,9}\s+\d{4})",
        ]
        .iter()
        .map(|date| {
            Regex::new(&format!(r"(?i){KEYWORDS}\s*[:\-]?\s*{date}")).expect("static pattern")
        })
        .collect()
    })
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// Find a date that is explicitly labelled with deadline wording.
/// Posted/published dates deliberately do not match.
pub fn find_due_date(text: &str) -> Option<NaiveDate> {
    if text.is_empty() {
        return None;
    }
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    for pattern in deadline_patterns() {
        if let Some(caps) = pattern.captures(&flat) {
            if let Some(date) = caps.get(1).and_then(|m| parse_date(m.as_str())) {
                return Some(date);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_labelled_dates_match() {
        assert_eq!(
            find_due_date("Applications Due: January 3, 2020"),
            Some(date(2020, 1, 3))
        );
        assert_eq!(
            find_due_date("Proposal due 6/14/2023 at 2 pm"),
            Some(date(2023, 6, 14))
        );
        assert_eq!(
            find_due_date("Submission deadline 2026-02-01"),
            Some(date(2026, 2, 1))
        );
        assert_eq!(
            find_due_date("Closing date - 14 March 2025"),
            Some(date(2025, 3, 14))
        );
        assert_eq!(
            find_due_date("Expiration Date: 12/31/2025"),
            Some(date(2025, 12, 31))
        );
    }

    #[test]
    fn test_whitespace_is_flattened() {
        assert_eq!(
            find_due_date("Deadline:\n  July 1,\n 2025"),
            Some(date(2025, 7, 1))
        );
    }

    #[test]
    fn test_posted_dates_do_not_match() {
        assert_eq!(find_due_date("Posted June 6, 2025 by staff"), None);
        assert_eq!(find_due_date("Published: 01/02/2024"), None);
        assert_eq!(find_due_date(""), None);
    }
}
