//! Listing-page analysis: ask the model which items on a portal page are
//! new opportunities, then validate its answers against the actual link
//! list before spending navigation hops on them.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::augment::augment_listing_links;
use crate::config::CrawlerConfig;
use crate::dates::find_due_date;
use crate::fetch::PageFetcher;
use crate::links::{canonical_url, collect_links, visible_text};
use crate::llm::{complete_json, LanguageModel, LlmOptions};
use crate::prompts::{build_listing_prompt, LISTING_SYSTEM};
use crate::storage::Storage;
use crate::types::{exclusion_hash, KnownItem, ListingItem, Website};

/// A listing item that survived validation, ready for navigation.
#[derive(Debug, Clone)]
pub struct CandidateItem {
    pub title: String,
    pub url: String,
    pub start_url: String,
    pub content_snippet: Option<String>,
}

/// What a listing pass produced for one site.
#[derive(Debug, Clone)]
pub struct ListingAnalysis {
    pub listing_url: String,
    pub items: Vec<CandidateItem>,
}

pub async fn analyze_listing(
    fetcher: &dyn PageFetcher,
    llm: &dyn LanguageModel,
    storage: &dyn Storage,
    config: &CrawlerConfig,
    site: &Website,
    known: &[KnownItem],
) -> Result<ListingAnalysis> {
    let resp = fetcher
        .get(&site.url, None, None)
        .await
        .with_context(|| format!("Failed to fetch listing page {}", site.url))?;
    let listing_url = resp.final_url.clone();
    let html = resp.text();

    let page_text = visible_text(&html, config.listing_max_text);
    let mut links = collect_links(&html, &listing_url, config.listing_max_links);
    augment_listing_links(fetcher, &html, &listing_url, &mut links, config.listing_max_links)
        .await;
    debug!(site = %site.name, links = links.len(), "Gathered listing links");

    let today = config.today();
    let prompt = build_listing_prompt(&page_text, &links, known, &listing_url, today);
    let options = LlmOptions::with_system(LISTING_SYSTEM);
    let parsed = complete_json(llm, &prompt, &options)
        .await
        .context("Listing model call failed")?;
    let raw_items = parsed
        .get("items")
        .and_then(serde_json::Value::as_array)
        .cloned()
        .unwrap_or_default();
    info!(site = %site.name, proposed = raw_items.len(), "Listing model returned items");

    let listing_canonical = canonical_url(&listing_url);
    let mut items = Vec::new();
    for raw in &raw_items {
        let Some(item) = ListingItem::from_value(raw) else {
            warn!(site = %site.name, "Dropping malformed listing item");
            continue;
        };
        if item.title.is_empty() || item.url.is_empty() {
            debug!(site = %site.name, "Dropping item without title/url");
            continue;
        }

        let Some(link) = item
            .detail_link_index
            .and_then(|idx| usize::try_from(idx).ok())
            .and_then(|idx| links.get(idx))
        else {
            warn!(
                site = %site.name,
                title = %item.title,
                index = ?item.detail_link_index,
                "Skipping item: missing or invalid detail_link_index"
            );
            continue;
        };
        let start_url = link.href.clone();
        if canonical_url(&start_url) == listing_canonical {
            warn!(
                site = %site.name,
                title = %item.title,
                "Skipping item: model selected the listing URL as detail link"
            );
            continue;
        }

        // Cheap deadline scan over everything we already know about the
        // item; saves hops on rows that are visibly past due.
        let combined = [
            item.title.as_str(),
            item.content_snippet.as_deref().unwrap_or(""),
            &link.text,
            &link.heading,
            &link.context,
        ]
        .join(" \n ");
        if let Some(due) = find_due_date(&combined) {
            if due < today {
                info!(
                    site = %site.name,
                    title = %item.title,
                    due = %due,
                    "Dropping expired item before navigation"
                );
                continue;
            }
        }

        let hash = exclusion_hash(&item.title, &listing_url);
        if storage
            .exclusion_exists(&hash)
            .await
            .context("Exclusion pre-check failed")?
        {
            info!(site = %site.name, title = %item.title, "Skipping previously excluded item");
            continue;
        }

        items.push(CandidateItem {
            title: item.title,
            url: item.url,
            start_url,
            content_snippet: item.content_snippet,
        });
    }

    Ok(ListingAnalysis { listing_url, items })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockFetcher, MockStorage, ScriptedModel};
    use serde_json::json;

    const LISTING_HTML: &str = r#"<html><body>
        <h2>Open RFPs</h2>
        <ul>
          <li>Data Platform RFP <a href="/rfps/platform">Learn more</a></li>
          <li>Old RFP (Applications Due: January 3, 2020) <a href="/rfps/old">Learn more</a></li>
          <li>Known Bad <a href="/rfps/bad">Learn more</a></li>
        </ul>
    </body></html>"#;

    fn site() -> Website {
        Website {
            id: 1,
            name: "portal".into(),
            url: "https://portal.example/rfps".into(),
            enabled: true,
        }
    }

    fn config() -> CrawlerConfig {
        CrawlerConfig {
            today_override: Some(chrono::NaiveDate::from_ymd_opt(2025, 6, 8).unwrap()),
            ..Default::default()
        }
    }

    fn fetcher() -> MockFetcher {
        let mut fetcher = MockFetcher::default();
        fetcher.add_html("https://portal.example/rfps", LISTING_HTML);
        fetcher
    }

    #[tokio::test]
    async fn test_valid_item_survives() {
        let model = ScriptedModel::new(vec![json!({
            "items": [{"title": "Data Platform RFP", "url": "https://portal.example/rfps/platform", "detail_link_index": 0}]
        })
        .to_string()]);
        let analysis = analyze_listing(&fetcher(), &model, &MockStorage::default(), &config(), &site(), &[])
            .await
            .unwrap();
        assert_eq!(analysis.items.len(), 1);
        assert_eq!(analysis.items[0].start_url, "https://portal.example/rfps/platform");
    }

    #[tokio::test]
    async fn test_invalid_index_dropped() {
        let model = ScriptedModel::new(vec![json!({
            "items": [
                {"title": "No Index", "url": "https://portal.example/x"},
                {"title": "Bad Index", "url": "https://portal.example/x", "detail_link_index": 99}
            ]
        })
        .to_string()]);
        let analysis = analyze_listing(&fetcher(), &model, &MockStorage::default(), &config(), &site(), &[])
            .await
            .unwrap();
        assert!(analysis.items.is_empty());
    }

    #[tokio::test]
    async fn test_expired_by_prefilter_dropped() {
        // Index 1 is the "Old RFP" whose context carries a 2020 due date.
        let model = ScriptedModel::new(vec![json!({
            "items": [{"title": "Old RFP", "url": "https://portal.example/rfps/old", "detail_link_index": 1}]
        })
        .to_string()]);
        let analysis = analyze_listing(&fetcher(), &model, &MockStorage::default(), &config(), &site(), &[])
            .await
            .unwrap();
        assert!(analysis.items.is_empty());
    }

    #[tokio::test]
    async fn test_excluded_item_skipped() {
        let model = ScriptedModel::new(vec![json!({
            "items": [{"title": "Known Bad", "url": "https://portal.example/rfps/bad", "detail_link_index": 2}]
        })
        .to_string()]);
        let storage = MockStorage::default();
        storage.seed_exclusion_hash(&exclusion_hash("Known Bad", "https://portal.example/rfps"));
        let analysis = analyze_listing(&fetcher(), &model, &storage, &config(), &site(), &[])
            .await
            .unwrap();
        assert!(analysis.items.is_empty());
    }

    #[tokio::test]
    async fn test_model_garbage_is_site_failure() {
        let model = ScriptedModel::new(vec!["total nonsense".to_string()]);
        let err = analyze_listing(&fetcher(), &model, &MockStorage::default(), &config(), &site(), &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Listing model call failed"));
    }
}
