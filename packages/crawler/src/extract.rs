//! Resolving a URL into text: direct PDFs, PDFs linked or embedded in an
//! HTML shell, or plain page text as the fallback.

use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::fetch::{FetchedResponse, PageFetcher, ACCEPT_PDF};
use crate::links::visible_text;
use crate::text::truncate_chars;

const PDF_MAGIC: &[u8] = b"%PDF-";

/// What a detail URL resolved to.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub text: String,
    pub final_url: String,
    pub pdf_bytes: Option<Vec<u8>>,
}

fn pdf_href_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\.pdf($|\?)").expect("static pattern"))
}

/// PDF detection for a first-party response: content type, URL extension,
/// disposition filename, or file signature.
pub fn looks_like_pdf(resp: &FetchedResponse) -> bool {
    resp.content_type.to_lowercase().contains("application/pdf")
        || crate::links::is_pdf_url(&resp.final_url)
        || resp.content_disposition.to_lowercase().contains(".pdf")
        || resp.body.starts_with(PDF_MAGIC)
}

/// Weaker check for probed sub-resources: servers often label PDFs as
/// octet-stream, so the signature alone is enough.
fn is_pdf_payload(resp: &FetchedResponse) -> bool {
    resp.content_type.to_lowercase().contains("application/pdf")
        || resp.body.starts_with(PDF_MAGIC)
}

/// First linked PDF anchor and first embedded PDF frame of a page,
/// resolved absolute.
pub fn find_pdf_candidates(html: &str, base_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };
    let mut out = Vec::new();

    let anchor_sel = Selector::parse("a[href]").expect("static selector");
    if let Some(href) = document
        .select(&anchor_sel)
        .filter_map(|el| el.value().attr("href"))
        .find(|href| pdf_href_re().is_match(href))
    {
        if let Ok(joined) = base.join(href) {
            out.push(joined.to_string());
        }
    }

    let frame_sel = Selector::parse("iframe[src], embed[src]").expect("static selector");
    if let Some(src) = document
        .select(&frame_sel)
        .filter_map(|el| el.value().attr("src"))
        .find(|src| pdf_href_re().is_match(src))
    {
        if let Ok(joined) = base.join(src) {
            let joined = joined.to_string();
            if !out.contains(&joined) {
                out.push(joined);
            }
        }
    }
    out
}

/// Extract PDF text, chunked and re-joined, capped at `max_chars`.
pub fn extract_pdf_text(bytes: &[u8], max_chars: usize) -> String {
    // pdf-extract panics on some malformed files; contain it.
    let parsed = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes));
    let text = match parsed {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!(error = %e, "PDF parsing failed");
            return String::new();
        }
        Err(_) => {
            warn!("PDF parsing panicked");
            return String::new();
        }
    };
    let chunks = TextSplitter::default().split(&text);
    let joined = chunks.join("\n\n");
    if joined.chars().count() > max_chars {
        debug!(
            from = joined.len(),
            to = max_chars,
            "Trimming PDF text"
        );
    }
    truncate_chars(&joined, max_chars).to_string()
}

/// Resolve a URL to `(text, final_url, pdf_bytes?)`.
pub async fn extract_detail(
    fetcher: &dyn PageFetcher,
    url: &str,
    referer: Option<&str>,
    max_chars: usize,
) -> Result<Extracted> {
    debug!(url = %url, "Extracting detail content");
    let resp = fetcher.get(url, referer, None).await?;

    if looks_like_pdf(&resp) {
        debug!(url = %resp.final_url, "Detected PDF response");
        return Ok(Extracted {
            text: extract_pdf_text(&resp.body, max_chars),
            final_url: resp.final_url,
            pdf_bytes: Some(resp.body.to_vec()),
        });
    }

    let html = resp.text();
    for candidate in find_pdf_candidates(&html, &resp.final_url) {
        let probe = fetcher
            .get(&candidate, referer.or(Some(resp.final_url.as_str())), Some(ACCEPT_PDF))
            .await;
        match probe {
            Ok(pdf_resp) if is_pdf_payload(&pdf_resp) => {
                debug!(url = %candidate, "Found PDF behind detail page");
                return Ok(Extracted {
                    text: extract_pdf_text(&pdf_resp.body, max_chars),
                    final_url: pdf_resp.final_url,
                    pdf_bytes: Some(pdf_resp.body.to_vec()),
                });
            }
            Ok(pdf_resp) => {
                warn!(
                    url = %candidate,
                    content_type = %pdf_resp.content_type,
                    "Linked file did not look like a PDF"
                );
            }
            Err(e) => {
                warn!(url = %candidate, error = %e, "Failed to fetch candidate PDF");
            }
        }
    }

    Ok(Extracted {
        text: visible_text(&html, max_chars),
        final_url: resp.final_url,
        pdf_bytes: None,
    })
}

/// Recursive character splitter: prefers paragraph breaks, then line
/// breaks, then spaces, before cutting mid-word.
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

const SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
        }
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        if char_len(text) <= self.chunk_size {
            return if text.is_empty() {
                Vec::new()
            } else {
                vec![text.to_string()]
            };
        }
        let (sep_idx, sep) = separators
            .iter()
            .enumerate()
            .find(|(_, s)| s.is_empty() || text.contains(*s))
            .map(|(i, s)| (i, *s))
            .unwrap_or((separators.len() - 1, ""));

        if sep.is_empty() {
            return self.hard_split(text);
        }
        let rest = &separators[sep_idx + 1..];

        let mut pieces: Vec<String> = Vec::new();
        for piece in text.split(sep) {
            if char_len(piece) > self.chunk_size {
                pieces.extend(self.split_with(piece, rest));
            } else if !piece.is_empty() {
                pieces.push(piece.to_string());
            }
        }
        self.merge(pieces, sep)
    }

    /// Greedily pack pieces into chunks, carrying `chunk_overlap` chars of
    /// trailing pieces into the next chunk.
    fn merge(&self, pieces: Vec<String>, sep: &str) -> Vec<String> {
        let sep_len = char_len(sep);
        let mut chunks: Vec<String> = Vec::new();
        let mut window: Vec<String> = Vec::new();
        let mut total = 0usize;

        for piece in pieces {
            let piece_len = char_len(&piece);
            let extra = if window.is_empty() { 0 } else { sep_len };
            if total + extra + piece_len > self.chunk_size && !window.is_empty() {
                chunks.push(window.join(sep));
                while total > self.chunk_overlap
                    || (!window.is_empty() && total + sep_len + piece_len > self.chunk_size)
                {
                    let front = window.remove(0);
                    total -= char_len(&front);
                    if !window.is_empty() {
                        total -= sep_len;
                    }
                    if window.is_empty() {
                        break;
                    }
                }
            }
            if !window.is_empty() {
                total += sep_len;
            }
            total += piece_len;
            window.push(piece);
        }
        if !window.is_empty() {
            chunks.push(window.join(sep));
        }
        chunks
    }

    fn hard_split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let step = self.chunk_size.saturating_sub(self.chunk_overlap).max(1);
        let mut out = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            out.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
        out
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
