//! Hop-bounded navigation from a listing link to the final detail page or
//! PDF. The model steers; this module enforces the budget, the loop guard,
//! and index validity, and never trusts a URL it was not shown.

use std::collections::HashSet;

use tracing::{info, warn};

use crate::config::CrawlerConfig;
use crate::extract::{extract_detail, looks_like_pdf, Extracted};
use crate::fetch::PageFetcher;
use crate::links::{collect_links, is_pdf_url, visible_text};
use crate::llm::{complete_json, LanguageModel, LlmOptions};
use crate::prompts::{build_nav_prompt, NAV_SYSTEM};
use crate::types::NavDecision;

const NAV_MAX_LINKS: usize = 120;
const NAV_MAX_TOKENS: u32 = 1200;

/// Where navigation ended up.
#[derive(Debug, Clone)]
pub struct FinalPage {
    pub url: String,
    pub title: String,
    pub text: String,
    pub pdf_bytes: Option<Vec<u8>>,
}

fn pdf_final(extracted: Extracted, title: String) -> FinalPage {
    FinalPage {
        url: extracted.final_url,
        title,
        text: extracted.text,
        pdf_bytes: extracted.pdf_bytes,
    }
}

/// Walk from `start_url` toward a final page, at most `max_hops` pages.
/// Every terminal condition other than success returns `None`; the caller
/// records nothing persistent for those.
pub async fn navigate_to_final(
    fetcher: &dyn PageFetcher,
    llm: &dyn LanguageModel,
    config: &CrawlerConfig,
    start_url: &str,
    seed_title: &str,
    known_titles: &[String],
    listing_url: &str,
) -> Option<FinalPage> {
    let seed_title = seed_title.trim();
    let mut visited: HashSet<String> = HashSet::new();
    let mut current = start_url.to_string();
    let mut referer = listing_url.to_string();

    for hop in 1..=config.max_hops {
        if !visited.insert(current.clone()) {
            info!(url = %current, "Loop detected; aborting navigation");
            return None;
        }

        if is_pdf_url(&current) {
            let title = non_empty(seed_title).unwrap_or("(PDF)").to_string();
            return match extract_detail(fetcher, &current, Some(&referer), config.max_pdf_text_chars)
                .await
            {
                Ok(extracted) => Some(pdf_final(extracted, title)),
                Err(e) => {
                    warn!(url = %current, error = %e, "Failed PDF extraction");
                    None
                }
            };
        }

        let resp = match fetcher.get(&current, Some(&referer), None).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(url = %current, error = %e, "Failed to fetch during navigation");
                return None;
            }
        };
        // Some portals serve PDFs from extension-less handler URLs.
        if looks_like_pdf(&resp) {
            let title = non_empty(seed_title).unwrap_or("(PDF)").to_string();
            return Some(FinalPage {
                url: resp.final_url.clone(),
                title,
                text: crate::extract::extract_pdf_text(&resp.body, config.max_pdf_text_chars),
                pdf_bytes: Some(resp.body.to_vec()),
            });
        }

        let page_url = resp.final_url.clone();
        let html = resp.text();
        let page_text = visible_text(&html, config.nav_page_max_text);
        let page_links = collect_links(&html, &page_url, NAV_MAX_LINKS);

        let prompt = build_nav_prompt(
            &page_text,
            &page_links,
            known_titles,
            &page_url,
            hop,
            config.max_hops,
            config.today(),
        );
        let options = LlmOptions::with_system(NAV_SYSTEM).max_tokens(NAV_MAX_TOKENS);
        let decision = match complete_json(llm, &prompt, &options).await {
            Ok(value) => NavDecision::from_value(&value),
            Err(e) => {
                warn!(url = %page_url, error = %e, "Navigation model call failed; stopping");
                return None;
            }
        };

        match decision {
            NavDecision::Final { title, url } => {
                let final_url = url.unwrap_or_else(|| page_url.clone());
                let final_title = title
                    .as_deref()
                    .and_then(non_empty)
                    .or_else(|| non_empty(seed_title))
                    .unwrap_or("(untitled RFP)")
                    .to_string();

                if is_pdf_url(&final_url) {
                    return match extract_detail(
                        fetcher,
                        &final_url,
                        Some(&page_url),
                        config.max_pdf_text_chars,
                    )
                    .await
                    {
                        Ok(extracted) => Some(pdf_final(extracted, final_title)),
                        Err(e) => {
                            warn!(url = %final_url, error = %e, "Failed to fetch declared final PDF");
                            None
                        }
                    };
                }
                if final_url == page_url || final_url == current {
                    return Some(FinalPage {
                        url: page_url,
                        title: final_title,
                        text: page_text,
                        pdf_bytes: None,
                    });
                }
                return match fetcher.get(&final_url, Some(&page_url), None).await {
                    Ok(final_resp) => {
                        let text = if looks_like_pdf(&final_resp) {
                            crate::extract::extract_pdf_text(
                                &final_resp.body,
                                config.max_pdf_text_chars,
                            )
                        } else {
                            visible_text(&final_resp.text(), config.nav_page_max_text)
                        };
                        let pdf_bytes = looks_like_pdf(&final_resp).then(|| final_resp.body.to_vec());
                        Some(FinalPage {
                            url: final_resp.final_url,
                            title: final_title,
                            text,
                            pdf_bytes,
                        })
                    }
                    Err(e) => {
                        warn!(url = %final_url, error = %e, "Failed to fetch declared final URL");
                        None
                    }
                };
            }
            NavDecision::Continue { index } => {
                let Some(link) = index
                    .and_then(|i| usize::try_from(i).ok())
                    .and_then(|i| page_links.get(i))
                else {
                    info!(url = %page_url, hop, "Invalid next_link_index; aborting navigation");
                    return None;
                };
                let next = link.href.clone();
                if is_pdf_url(&next) {
                    let title = non_empty(&link.text)
                        .or_else(|| non_empty(seed_title))
                        .unwrap_or("(PDF)")
                        .to_string();
                    return match extract_detail(
                        fetcher,
                        &next,
                        Some(&page_url),
                        config.max_pdf_text_chars,
                    )
                    .await
                    {
                        Ok(extracted) => Some(pdf_final(extracted, title)),
                        Err(e) => {
                            warn!(url = %next, error = %e, "Failed PDF extraction");
                            None
                        }
                    };
                }
                referer = page_url;
                current = next;
            }
            NavDecision::GiveUp => {
                info!(url = %page_url, hop, "Navigation gave up");
                return None;
            }
            NavDecision::Expired => {
                info!(url = %page_url, hop, "Navigation found the opportunity expired");
                return None;
            }
            NavDecision::Unrecognized(status) => {
                info!(url = %page_url, hop, status = %status, "Unknown navigation status; aborting");
                return None;
            }
        }
    }

    info!(
        start_url = %start_url,
        max_hops = config.max_hops,
        "Reached hop limit without a final page"
    );
    None
}

fn non_empty(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
