//! Per-run orchestration across the configured websites. One HTTP session,
//! one summary cache, and one log buffer per run; failures are contained
//! at site and item granularity.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{error, info};

use crate::config::CrawlerConfig;
use crate::fetch::PageFetcher;
use crate::listing::analyze_listing;
use crate::llm::LanguageModel;
use crate::navigator::navigate_to_final;
use crate::storage::Storage;
use crate::types::{NewRfp, Website};
use crate::validator::{is_self_referential, validate_and_store};

/// Per-run log sink feeding the debug digest. Deliberately a plain value
/// passed down as a dependency, never process-global state.
#[derive(Default)]
pub struct RunLog {
    lines: Mutex<Vec<String>>,
}

impl RunLog {
    pub fn push(&self, line: impl Into<String>) {
        self.lines.lock().unwrap().push(line.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

/// Aggregate result of one pipeline run.
#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub new_rfps: Vec<NewRfp>,
    pub failed_sites: Vec<String>,
}

impl RunReport {
    pub fn new_count(&self) -> usize {
        self.new_rfps.len()
    }
}

/// Run the full pipeline over every enabled website, in row order.
pub async fn run_pipeline(
    fetcher: &dyn PageFetcher,
    llm: &dyn LanguageModel,
    storage: &dyn Storage,
    config: &CrawlerConfig,
    log: &RunLog,
) -> Result<RunReport> {
    let websites = storage
        .enabled_websites()
        .await
        .context("Failed to load website settings")?;
    info!(sites = websites.len(), "Starting pipeline run");
    log.push(format!("Run started over {} site(s)", websites.len()));

    let mut report = RunReport::default();
    for site in &websites {
        match process_site(fetcher, llm, storage, config, site, log).await {
            Ok(mut new_rfps) => {
                log.push(format!("{}: {} new item(s)", site.name, new_rfps.len()));
                report.new_rfps.append(&mut new_rfps);
            }
            Err(e) => {
                error!(site = %site.name, error = %format!("{e:#}"), "Site failed");
                log.push(format!("{}: FAILED ({e:#})", site.name));
                report.failed_sites.push(site.name.clone());
            }
        }
    }

    info!(
        new = report.new_count(),
        failed_sites = report.failed_sites.len(),
        "Pipeline run finished"
    );
    log.push(format!(
        "Run finished: {} new, {} site failure(s)",
        report.new_count(),
        report.failed_sites.len()
    ));
    Ok(report)
}

async fn process_site(
    fetcher: &dyn PageFetcher,
    llm: &dyn LanguageModel,
    storage: &dyn Storage,
    config: &CrawlerConfig,
    site: &Website,
    log: &RunLog,
) -> Result<Vec<NewRfp>> {
    info!(site = %site.name, url = %site.url, "Processing site");

    let domain = url::Url::parse(&site.url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| site.url.clone());

    let mut known = storage
        .recent_processed(&domain, 200)
        .await
        .context("Failed to load known items")?;
    let known_titles: Vec<String> = known.iter().map(|k| k.title.clone()).collect();
    let exclusions = storage
        .recent_exclusions(&domain, 50)
        .await
        .context("Failed to load known exclusions")?;
    known.extend(exclusions);

    let analysis = analyze_listing(fetcher, llm, storage, config, site, &known).await?;
    let mut new_rfps = Vec::new();
    let mut summary_cache: HashMap<String, String> = HashMap::new();

    for item in &analysis.items {
        let final_page = match navigate_to_final(
            fetcher,
            llm,
            config,
            &item.start_url,
            &item.title,
            &known_titles,
            &analysis.listing_url,
        )
        .await
        {
            Some(page) => page,
            None => {
                info!(site = %site.name, title = %item.title, "Navigation did not resolve a final page");
                log.push(format!("{}: no final page for '{}'", site.name, item.title));
                continue;
            }
        };

        if is_self_referential(&final_page.url, &analysis.listing_url) {
            info!(site = %site.name, title = %item.title, "Final URL is the listing page; skipping");
            continue;
        }

        match validate_and_store(
            llm,
            storage,
            config,
            &site.name,
            &analysis.listing_url,
            item,
            &final_page,
            &mut summary_cache,
        )
        .await
        {
            Ok(Some(new_rfp)) => {
                log.push(format!("{}: inserted '{}' -> {}", site.name, new_rfp.title, new_rfp.url));
                new_rfps.push(new_rfp);
            }
            Ok(None) => {}
            Err(e) => {
                error!(site = %site.name, title = %item.title, error = %format!("{e:#}"), "Item failed");
                log.push(format!("{}: item '{}' failed ({e:#})", site.name, item.title));
            }
        }
    }

    Ok(new_rfps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockFetcher, MockStorage, ScriptedModel};
    use serde_json::json;

    fn config() -> CrawlerConfig {
        CrawlerConfig {
            today_override: Some(chrono::NaiveDate::from_ymd_opt(2025, 6, 8).unwrap()),
            ..Default::default()
        }
    }

    fn website(id: i32, name: &str, url: &str) -> Website {
        Website {
            id,
            name: name.into(),
            url: url.into(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_no_sites_is_empty_run() {
        let storage = MockStorage::default();
        let log = RunLog::default();
        let report = run_pipeline(
            &MockFetcher::default(),
            &ScriptedModel::new(vec![]),
            &storage,
            &config(),
            &log,
        )
        .await
        .unwrap();
        assert_eq!(report.new_count(), 0);
        assert!(report.failed_sites.is_empty());
        assert!(!log.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_site_failure_does_not_stop_run() {
        let storage = MockStorage::default();
        storage.seed_website(website(1, "broken", "https://broken.example/rfps"));
        storage.seed_website(website(2, "empty", "https://empty.example/rfps"));

        // First site 404s; second returns a page with no items.
        let mut fetcher = MockFetcher::default();
        fetcher.add_html("https://empty.example/rfps", "<html><body>nothing here</body></html>");
        let model = ScriptedModel::new(vec![json!({"items": []}).to_string()]);

        let log = RunLog::default();
        let report = run_pipeline(&fetcher, &model, &storage, &config(), &log).await.unwrap();
        assert_eq!(report.failed_sites, vec!["broken".to_string()]);
        assert_eq!(report.new_count(), 0);
        assert!(log.snapshot().iter().any(|l| l.contains("broken: FAILED")));
    }

    #[tokio::test]
    async fn test_direct_pdf_end_to_end() {
        let storage = MockStorage::default();
        storage.seed_website(website(1, "portal", "https://portal.example/rfps"));

        let mut fetcher = MockFetcher::default();
        fetcher.add_html(
            "https://portal.example/rfps",
            r#"<html><body><h2>Open</h2>
               <ul><li>RFP X <a href="/files/rfp.pdf">Download</a></li></ul>
               </body></html>"#,
        );
        fetcher.add_pdf("https://portal.example/files/rfp.pdf", b"%PDF-1.7 fake");

        let model = ScriptedModel::new(vec![
            json!({"items": [{"title": "RFP X", "url": "https://portal.example/files/rfp.pdf", "detail_link_index": 0}]}).to_string(),
            json!({"status": "active", "reason": "", "matched_text": "", "deadline_iso": "2999-01-01"}).to_string(),
            json!({"in_scope": true, "reason": "fits"}).to_string(),
        ]);

        let log = RunLog::default();
        let report = run_pipeline(&fetcher, &model, &storage, &config(), &log).await.unwrap();
        assert_eq!(report.new_count(), 1);
        let row = &storage.processed()[0];
        assert_eq!(row.url, "https://portal.example/files/rfp.pdf");
        assert_eq!(row.title, "RFP X");
        assert!(row.pdf_content.is_some());
    }
}
