//! Listing-page augmentation for client-rendered content the plain HTML
//! fetch cannot see: Kendo grid data endpoints declared in inline scripts,
//! and links living inside iframes.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::fetch::PageFetcher;
use crate::links::{collect_links, link_of, PageLink};

fn kendo_read_object_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)transport\s*:\s*\{[^}]*read\s*:\s*(?:\{|\[)?\s*url\s*:\s*['"]([^'"]+)['"]"#)
            .expect("static pattern")
    })
}

fn kendo_read_shorthand_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)transport\s*:\s*\{[^}]*read\s*:\s*['"]([^'"]+)['"]"#)
            .expect("static pattern")
    })
}

/// Grid data endpoints declared in the page's inline scripts.
pub fn find_kendo_read_urls(html: &str, base_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };
    let script_sel = Selector::parse("script").expect("static selector");

    let mut out: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for script in document.select(&script_sel) {
        let body = script.text().collect::<String>();
        for caps in kendo_read_object_re().captures_iter(&body) {
            if let Ok(joined) = base.join(&caps[1]) {
                let joined = joined.to_string();
                if seen.insert(joined.clone()) {
                    out.push(joined);
                }
            }
        }
        for caps in kendo_read_shorthand_re().captures_iter(&body) {
            let raw = caps[1].to_lowercase();
            if raw.ends_with(".js") || raw.ends_with(".css") || raw.contains("datatype") {
                continue;
            }
            if let Ok(joined) = base.join(&caps[1]) {
                let joined = joined.to_string();
                if seen.insert(joined.clone()) {
                    out.push(joined);
                }
            }
        }
    }
    out
}

/// Anti-forgery token for grid endpoints that refuse anonymous reads.
pub fn find_verification_token(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let input_sel =
        Selector::parse(r#"input[name="__RequestVerificationToken"]"#).expect("static selector");
    if let Some(value) = document
        .select(&input_sel)
        .filter_map(|el| el.value().attr("value"))
        .next()
    {
        return Some(value.to_string());
    }
    let meta_sel =
        Selector::parse(r#"meta[name="__RequestVerificationToken"]"#).expect("static selector");
    document
        .select(&meta_sel)
        .filter_map(|el| el.value().attr("content"))
        .next()
        .map(str::to_string)
}

/// All iframe sources of the page, resolved absolute.
pub fn find_iframe_srcs(html: &str, base_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };
    let sel = Selector::parse("iframe[src]").expect("static selector");
    let mut seen = HashSet::new();
    document
        .select(&sel)
        .filter_map(|el| el.value().attr("src").map(str::trim))
        .filter(|src| !src.is_empty())
        .filter_map(|src| base.join(src).ok())
        .map(|u| u.to_string())
        .filter(|u| seen.insert(u.clone()))
        .collect()
}

fn row_field<'a>(row: &'a Value, keys: &[&str]) -> &'a str {
    keys.iter()
        .find_map(|k| row.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .unwrap_or("")
}

/// Normalize a grid JSON payload into synthetic links. The payload shape
/// varies between deployments; rows may live under several keys.
pub fn kendo_rows_to_links(data: &Value, base_url: &str) -> Vec<PageLink> {
    let rows: &[Value] = if let Some(arr) = data.as_array() {
        arr
    } else if let Some(arr) = ["data", "Data", "results", "Results"]
        .iter()
        .find_map(|k| data.get(*k).and_then(Value::as_array))
    {
        arr
    } else if let Some(arr) = data
        .get("Data")
        .and_then(|d| d.get("items"))
        .and_then(Value::as_array)
    {
        arr
    } else {
        return Vec::new();
    };

    let base = Url::parse(base_url).ok();
    let mut out = Vec::new();
    for row in rows {
        if !row.is_object() {
            continue;
        }
        let title = row_field(row, &["Title", "title", "Name", "name"]);
        let file_url = row_field(row, &["FileUrl", "Url", "url"]);
        let expiration = row_field(
            row,
            &["DateExpiration", "ExpirationDate", "CloseDate", "Deadline"],
        );
        if title.is_empty() && file_url.is_empty() && expiration.is_empty() {
            continue;
        }

        let href = if file_url.is_empty() {
            base_url.to_string()
        } else {
            base.as_ref()
                .and_then(|b| b.join(file_url).ok())
                .map(|u| u.to_string())
                .unwrap_or_else(|| file_url.to_string())
        };

        let mut context_bits = Vec::new();
        if !title.is_empty() {
            context_bits.push(title.to_string());
        }
        if !expiration.is_empty() {
            context_bits.push(format!("Expiration Date: {expiration}"));
        }
        let context = context_bits.join(" | ");

        let text = if !title.is_empty() {
            title
        } else if !file_url.is_empty() {
            file_url
        } else {
            "(item)"
        };
        out.push(link_of(text, &href, "", &context));
    }
    out
}

/// Enrich a listing page's link list in place: grid rows are prepended
/// (they are usually the actual items), iframe links appended, then the
/// whole list deduped and capped.
pub async fn augment_listing_links(
    fetcher: &dyn PageFetcher,
    html: &str,
    page_url: &str,
    links: &mut Vec<PageLink>,
    max_links: usize,
) {
    let grid_urls = find_kendo_read_urls(html, page_url);
    if !grid_urls.is_empty() {
        let token = find_verification_token(html);
        let mut grid_links = Vec::new();
        for endpoint in &grid_urls {
            match fetcher.get_grid_json(endpoint, page_url, token.as_deref()).await {
                Ok(data) => {
                    let rows = kendo_rows_to_links(&data, page_url);
                    debug!(endpoint = %endpoint, rows = rows.len(), "Fetched grid data");
                    grid_links.extend(rows);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "Failed to fetch grid data");
                }
            }
        }
        grid_links.truncate(max_links / 2);
        links.splice(0..0, grid_links);
    }

    for src in find_iframe_srcs(html, page_url).into_iter().take(2) {
        match fetcher.get(&src, Some(page_url), None).await {
            Ok(resp) => {
                let frame_links = collect_links(&resp.text(), &src, max_links);
                debug!(src = %src, links = frame_links.len(), "Gathered iframe links");
                links.extend(frame_links);
            }
            Err(e) => {
                warn!(src = %src, error = %e, "Failed to fetch iframe");
            }
        }
    }

    let mut seen = HashSet::new();
    links.retain(|l| seen.insert(l.href.clone()));
    links.truncate(max_links);
}
