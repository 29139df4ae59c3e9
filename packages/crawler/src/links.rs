//! Anchor harvesting for the model prompts.
//!
//! Each candidate link carries its visible text plus enough surrounding
//! context (nearest heading, enclosing list/table cell) for the model to
//! judge it without seeing the raw HTML. `scraper::Html` is not `Send`, so
//! everything here is synchronous and returns owned data.

use std::collections::HashSet;

use scraper::{ElementRef, Html, Node};
use url::Url;

use crate::text::truncate_chars;

const MAX_LINK_TEXT: usize = 200;
const MAX_HEADING: usize = 300;
const MAX_CONTEXT: usize = 500;

const LEARN_MORE_PHRASES: &[&str] = &[
    "learn more",
    "read more",
    "details",
    "more info",
    "about this opportunity",
    "view details",
];
const APPLY_PHRASES: &[&str] = &["apply", "application"];
const GENERIC_SEGMENTS: &[&str] = &["/events", "/event", "/news", "/blog", "/calendar"];
const CONTEXT_TAGS: &[&str] = &[
    "li", "article", "section", "div", "tr", "td", "table", "tbody",
];
const CHROME_TAGS: &[&str] = &["header", "nav", "footer"];
const HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];

/// One anchor as presented to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct PageLink {
    pub text: String,
    pub href: String,
    pub heading: String,
    pub context: String,
    pub is_learn_more: bool,
    pub is_apply: bool,
    pub is_pdf: bool,
    pub is_generic_listing: bool,
    pub depth: u32,
}

/// scheme://host + lowercased path, query/fragment dropped, trailing
/// slash trimmed. Used to detect "this link is the page itself".
pub fn canonical_url(u: &str) -> String {
    match Url::parse(u) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or("");
            let path = parsed.path().trim_end_matches('/').to_lowercase();
            match parsed.port() {
                Some(port) => format!("{}://{}:{}{}", parsed.scheme(), host, port, path),
                None => format!("{}://{}{}", parsed.scheme(), host, path),
            }
        }
        Err(_) => u.to_string(),
    }
}

/// Does the URL path (ignoring query and fragment) end in `.pdf`?
pub fn is_pdf_url(u: &str) -> bool {
    match Url::parse(u) {
        Ok(parsed) => parsed.path().to_lowercase().ends_with(".pdf"),
        Err(_) => {
            let stripped = u.split(['?', '#']).next().unwrap_or(u);
            stripped.to_lowercase().ends_with(".pdf")
        }
    }
}

/// Number of path separators once leading/trailing slashes are trimmed.
fn path_depth(u: &str) -> u32 {
    let path = Url::parse(u)
        .map(|p| p.path().to_string())
        .unwrap_or_else(|_| "/".to_string());
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        0
    } else {
        trimmed.matches('/').count() as u32
    }
}

pub fn link_of(text: &str, href: &str, heading: &str, context: &str) -> PageLink {
    let text_l = text.to_lowercase();
    let href_l = href.to_lowercase();
    let is_pdf = is_pdf_url(href);
    PageLink {
        text: truncate_chars(text, MAX_LINK_TEXT).to_string(),
        href: href.to_string(),
        heading: truncate_chars(heading, MAX_HEADING).to_string(),
        context: truncate_chars(context, MAX_CONTEXT).to_string(),
        is_learn_more: LEARN_MORE_PHRASES.iter().any(|p| text_l.contains(p)),
        is_apply: APPLY_PHRASES.iter().any(|p| text_l.contains(p)) || href_l.contains("qualtrics"),
        is_pdf,
        is_generic_listing: !is_pdf && GENERIC_SEGMENTS.iter().any(|s| href_l.contains(s)),
        depth: path_depth(href),
    }
}

/// Collect candidate anchors from a rendered page, in document order.
pub fn collect_links(html: &str, page_url: &str, max_links: usize) -> Vec<PageLink> {
    let document = Html::parse_document(html);
    let base = match Url::parse(page_url) {
        Ok(u) => u,
        Err(_) => return Vec::new(),
    };
    let page_canonical = canonical_url(page_url);
    let page_host = base.host_str().map(str::to_string);

    let mut links = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut last_heading = String::new();

    for node in document.tree.root().descendants() {
        let Node::Element(element) = node.value() else {
            continue;
        };
        let name = element.name();

        if HEADING_TAGS.contains(&name) {
            if let Some(el) = ElementRef::wrap(node) {
                last_heading = squash(&el.text().collect::<String>());
            }
            continue;
        }
        if name != "a" {
            continue;
        }
        let Some(href) = element.attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let Ok(full) = base.join(href) else {
            continue;
        };
        let full = full.to_string();
        if canonical_url(&full) == page_canonical {
            continue;
        }
        let in_chrome = node.ancestors().take(6).any(|a| {
            matches!(a.value(), Node::Element(el) if CHROME_TAGS.contains(&el.name()))
        });
        if in_chrome {
            continue;
        }
        let host = Url::parse(&full)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));
        if page_host.is_some() && host != page_host && !is_pdf_url(&full) {
            continue;
        }
        if !seen.insert(full.clone()) {
            continue;
        }

        let anchor_text = ElementRef::wrap(node)
            .map(|el| squash(&el.text().collect::<String>()))
            .unwrap_or_default();
        // Nearest enclosing list/table/section container, else the anchor's own text.
        let context = node
            .ancestors()
            .take(8)
            .find(|a| {
                matches!(a.value(), Node::Element(el) if CONTEXT_TAGS.contains(&el.name()))
            })
            .and_then(ElementRef::wrap)
            .map(|el| squash(&el.text().collect::<String>()))
            .unwrap_or_else(|| anchor_text.clone());

        links.push(link_of(&anchor_text, &full, &last_heading, &context));
        if links.len() >= max_links {
            break;
        }
    }
    links
}

/// All visible text of the page, one line per text node, scripts and
/// styles excluded, capped at `max_chars`.
pub fn visible_text(html: &str, max_chars: usize) -> String {
    let document = Html::parse_document(html);
    let mut parts: Vec<String> = Vec::new();
    for node in document.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        if node.ancestors().any(|a| {
            matches!(a.value(), Node::Element(el) if matches!(el.name(), "script" | "style" | "noscript"))
        }) {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed.to_string());
        }
    }
    let joined = parts.join("\n");
    truncate_chars(&joined, max_chars).to_string()
}

fn squash(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r##"<html><body>
        <header><a href="/home">Home</a></header>
        <nav><ul><li><a href="/about">About</a></li></ul></nav>
        <h2>Open Opportunities</h2>
        <ul>
          <li>Surveillance Platform RFP (due June 2030)
              <a href="/rfps/surveillance">Learn more</a></li>
          <li>Registry Upgrade
              <a href="/files/registry.pdf?v=2">Download PDF</a></li>
        </ul>
        <a href="/rfps/">This page</a>
        <a href="https://other.example/offsite">Partner site</a>
        <a href="https://other.example/docs/rfp.pdf">Offsite PDF</a>
        <a href="/rfps/surveillance">Learn more</a>
        <a href="#top">Back to top</a>
        <a href="">Empty</a>
        <footer><a href="/contact">Contact</a></footer>
    </body></html>"##;

    fn listing_links() -> Vec<PageLink> {
        collect_links(LISTING, "https://portal.example/rfps/", 50)
    }

    #[test]
    fn test_drops_chrome_self_offsite_fragment_and_dupes() {
        let links = listing_links();
        let hrefs: Vec<&str> = links.iter().map(|l| l.href.as_str()).collect();
        assert_eq!(
            hrefs,
            vec![
                "https://portal.example/rfps/surveillance",
                "https://portal.example/files/registry.pdf?v=2",
                "https://other.example/docs/rfp.pdf",
            ]
        );
    }

    #[test]
    fn test_heading_context_and_flags() {
        let links = listing_links();
        let learn = &links[0];
        assert_eq!(learn.heading, "Open Opportunities");
        assert!(learn.context.contains("Surveillance Platform RFP"));
        assert!(learn.is_learn_more);
        assert!(!learn.is_pdf);
        assert_eq!(learn.depth, 1);

        let pdf = &links[1];
        assert!(pdf.is_pdf);
        assert!(pdf.context.contains("Registry Upgrade"));
    }

    #[test]
    fn test_canonical_url() {
        assert_eq!(
            canonical_url("https://a.example/RFPs/?page=2#frag"),
            "https://a.example/rfps"
        );
        assert_eq!(
            canonical_url("https://a.example/rfps"),
            canonical_url("https://a.example/rfps/")
        );
    }

    #[test]
    fn test_is_pdf_url() {
        assert!(is_pdf_url("https://a.example/x.PDF"));
        assert!(is_pdf_url("https://a.example/x.pdf?download=1"));
        assert!(!is_pdf_url("https://a.example/x.pdf.html"));
        assert!(!is_pdf_url("https://a.example/pdfs/"));
    }

    #[test]
    fn test_visible_text_skips_scripts() {
        let html = "<html><body><script>var x = 1;</script><p>Hello</p><style>p{}</style><p>World</p></body></html>";
        let text = visible_text(html, 1000);
        assert_eq!(text, "Hello\nWorld");
    }

    #[test]
    fn test_visible_text_cap() {
        let html = "<p>abcdefghij</p>";
        assert_eq!(visible_text(html, 4), "abcd");
    }

    #[test]
    fn test_max_links() {
        let links = collect_links(LISTING, "https://portal.example/rfps/", 1);
        assert_eq!(links.len(), 1);
    }
}
