//! Lenient JSON recovery for model output.
//!
//! Models occasionally wrap JSON in code fences, leave trailing commas or
//! comments, or emit raw newlines inside string literals. This module peels
//! those away in stages, ending with a best-effort reconstruction of an
//! `items` array before giving up.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to parse JSON from model output")]
pub struct ParseError;

fn trailing_comma_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*([}\]])").expect("static pattern"))
}

fn items_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""items"\s*:\s*\["#).expect("static pattern"))
}

fn item_object_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\{[^{}]*"title"\s*:\s*"[^"]+"[^{}]*"url"\s*:\s*"[^"]+"[^{}]*\}"#)
            .expect("static pattern")
    })
}

/// Parse a JSON object out of raw model text, repairing common damage.
pub fn extract_json(text: &str) -> Result<Value, ParseError> {
    let s = strip_code_fences(text.trim());

    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(&s) {
        return Ok(v);
    }

    if let (Some(start), Some(end)) = (s.find('{'), s.rfind('}')) {
        if end > start {
            let mut candidate = s[start..=end].to_string();
            for _ in 0..3 {
                candidate = repair(&candidate);
                if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(&candidate) {
                    return Ok(v);
                }
            }
        }
    }

    let mut items = reconstruct_items_array(&s);
    if items.is_empty() {
        items = scrape_item_objects(&s);
    }
    if !items.is_empty() {
        let mut obj = Map::new();
        obj.insert("items".to_string(), Value::Array(items));
        return Ok(Value::Object(obj));
    }

    Err(ParseError)
}

fn strip_code_fences(s: &str) -> String {
    if !s.starts_with("```") {
        return s.to_string();
    }
    let mut lines: Vec<&str> = s.lines().collect();
    lines.remove(0);
    if lines
        .last()
        .map(|l| l.trim_end().ends_with("```"))
        .unwrap_or(false)
    {
        lines.pop();
    }
    lines.join("\n")
}

fn repair(s: &str) -> String {
    let cleaned = clean_outside_and_inside_strings(s);
    trailing_comma_re().replace_all(&cleaned, "$1").into_owned()
}

/// One string-aware cleanup pass: outside string literals, drop `//` and
/// `/* */` comments and normalize stray control characters; inside string
/// literals, escape raw newlines and blank out other control characters.
/// `//` inside a quoted URL survives untouched.
fn clean_outside_and_inside_strings(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    let mut in_str = false;
    let mut escaped = false;
    let mut quote = '"';
    while let Some(c) = chars.next() {
        if in_str {
            if escaped {
                out.push(c);
                escaped = false;
                continue;
            }
            match c {
                '\\' => {
                    out.push(c);
                    escaped = true;
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push(' '),
                c if c == quote => {
                    in_str = false;
                    out.push(c);
                }
                c if (c as u32) < 0x20 => out.push(' '),
                c => out.push(c),
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                in_str = true;
                quote = c;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            '\t' => out.push(' '),
            '\r' => {}
            c if (c as u32) < 0x20 && c != '\n' => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

/// Recover individual objects from a damaged `"items": [...]` block.
fn reconstruct_items_array(s: &str) -> Vec<Value> {
    let Some(m) = items_key_re().find(s) else {
        return Vec::new();
    };
    let rest = &s[m.end()..];
    let mut depth = 1usize;
    let mut end = rest.len();
    for (i, c) in rest.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    end = i;
                    break;
                }
            }
            _ => {}
        }
    }
    let block = rest[..end]
        .trim()
        .trim_matches(|c| c == '[' || c == ']')
        .trim();
    let splitter = Regex::new(r"\}\s*,\s*\{").expect("static pattern");
    let mut items = Vec::new();
    for part in splitter.split(block) {
        let frag = part.trim();
        if frag.is_empty() {
            continue;
        }
        let mut frag = frag.to_string();
        if !frag.starts_with('{') {
            frag.insert(0, '{');
        }
        if !frag.ends_with('}') {
            frag.push('}');
        }
        if let Some(obj) = parse_item_object(&frag) {
            items.push(obj);
        }
    }
    items
}

/// Last resort: regex out standalone objects that carry both keys.
fn scrape_item_objects(s: &str) -> Vec<Value> {
    item_object_re()
        .find_iter(s)
        .filter_map(|m| parse_item_object(m.as_str()))
        .collect()
}

fn parse_item_object(frag: &str) -> Option<Value> {
    let cleaned = repair(frag);
    match serde_json::from_str::<Value>(&cleaned) {
        Ok(v @ Value::Object(_)) if v.get("title").is_some() && v.get("url").is_some() => Some(v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json() {
        let v = extract_json(r#"{"items": []}"#).unwrap();
        assert!(v["items"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_fenced_json() {
        let raw = "```json\n{\"status\": \"final\"}\n```";
        let v = extract_json(raw).unwrap();
        assert_eq!(v["status"], "final");
    }

    #[test]
    fn test_json_inside_noise() {
        let raw = "Sure, here is the result:\n{\"status\": \"continue\", \"next_link_index\": 2}\nHope that helps!";
        let v = extract_json(raw).unwrap();
        assert_eq!(v["next_link_index"], 2);
    }

    #[test]
    fn test_trailing_commas_and_comments() {
        let raw = r#"{
            "items": [
                {"title": "A", "url": "https://a.example/x"}, // first
            ],
        }"#;
        let v = extract_json(raw).unwrap();
        assert_eq!(v["items"][0]["title"], "A");
        assert_eq!(v["items"][0]["url"], "https://a.example/x");
    }

    #[test]
    fn test_block_comments() {
        let raw = "{\"status\": \"final\" /* confident */, \"next_link_index\": null}";
        let v = extract_json(raw).unwrap();
        assert_eq!(v["status"], "final");
    }

    #[test]
    fn test_raw_newline_in_string() {
        let raw = "{\"status\": \"final\", \"reason\": \"line one\nline two\"}";
        let v = extract_json(raw).unwrap();
        assert_eq!(v["reason"], "line one\nline two");
    }

    #[test]
    fn test_items_reconstruction_from_broken_tail() {
        let raw = r#"{"items": [
            {"title": "A", "url": "https://a.example/a", "detail_link_index": 0},
            {"title": "B", "url": "https://b.example/b", "detail_link_index": 1}
        "#;
        let v = extract_json(raw).unwrap();
        let items = v["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["url"], "https://b.example/b");
    }

    #[test]
    fn test_object_scrape_fallback() {
        let raw = r#"I found these:
            first {"title": "A", "url": "https://a.example/a"} and also
            {"title": "B", "url": "https://b.example/b"} in the page."#;
        let v = extract_json(raw).unwrap();
        assert_eq!(v["items"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_unparseable_fails() {
        assert!(extract_json("no json here at all").is_err());
        assert!(extract_json("[1, 2, 3]").is_err());
    }
}
