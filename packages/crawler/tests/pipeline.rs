//! End-to-end pipeline scenarios over mock HTTP, model, and storage seams.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};

use rfp_crawler::config::CrawlerConfig;
use rfp_crawler::dispatcher::{run_pipeline, RunLog};
use rfp_crawler::fetch::{FetchedResponse, PageFetcher};
use rfp_crawler::llm::{LanguageModel, LlmOptions};
use rfp_crawler::storage::Storage;
use rfp_crawler::types::{
    ExclusionReason, KnownItem, ProcessedRfp, RfpExclusion, Website,
};

#[derive(Default)]
struct FixtureFetcher {
    pages: HashMap<String, FetchedResponse>,
    grids: HashMap<String, Value>,
}

impl FixtureFetcher {
    fn add_html(&mut self, url: &str, html: &str) {
        self.pages.insert(
            url.to_string(),
            FetchedResponse {
                final_url: url.to_string(),
                status: 200,
                content_type: "text/html; charset=utf-8".to_string(),
                content_disposition: String::new(),
                body: Bytes::copy_from_slice(html.as_bytes()),
            },
        );
    }

    fn add_pdf(&mut self, url: &str) {
        self.pages.insert(
            url.to_string(),
            FetchedResponse {
                final_url: url.to_string(),
                status: 200,
                content_type: "application/pdf".to_string(),
                content_disposition: String::new(),
                body: Bytes::from_static(b"%PDF-1.7 fixture"),
            },
        );
    }

    fn add_grid(&mut self, url: &str, data: Value) {
        self.grids.insert(url.to_string(), data);
    }
}

#[async_trait]
impl PageFetcher for FixtureFetcher {
    async fn get(
        &self,
        url: &str,
        _referer: Option<&str>,
        _accept: Option<&str>,
    ) -> Result<FetchedResponse> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("HTTP 404 for {url}"))
    }

    async fn get_grid_json(&self, url: &str, _referer: &str, _token: Option<&str>) -> Result<Value> {
        self.grids
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("HTTP 404 for {url}"))
    }
}

struct ScriptedModel {
    responses: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    fn new(responses: Vec<String>) -> Self {
        let mut responses = responses;
        responses.reverse();
        Self {
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, _prompt: &str, _options: &LlmOptions) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| anyhow::anyhow!("ScriptedModel ran out of responses"))
    }
}

#[derive(Default)]
struct MemoryStorage {
    processed: Mutex<Vec<ProcessedRfp>>,
    exclusions: Mutex<Vec<RfpExclusion>>,
    exclusion_hashes: Mutex<HashSet<String>>,
    websites: Mutex<Vec<Website>>,
}

impl MemoryStorage {
    fn seed_website(&self, name: &str, url: &str) {
        let mut websites = self.websites.lock().unwrap();
        let id = websites.len() as i32 + 1;
        websites.push(Website {
            id,
            name: name.into(),
            url: url.into(),
            enabled: true,
        });
    }

    fn processed(&self) -> Vec<ProcessedRfp> {
        self.processed.lock().unwrap().clone()
    }

    fn exclusions(&self) -> Vec<RfpExclusion> {
        self.exclusions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn recent_processed(&self, _domain: &str, limit: i64) -> Result<Vec<KnownItem>> {
        Ok(self
            .processed
            .lock()
            .unwrap()
            .iter()
            .rev()
            .take(limit as usize)
            .map(|r| KnownItem {
                title: r.title.clone(),
                url: r.url.clone(),
            })
            .collect())
    }

    async fn processed_url_exists(&self, url: &str) -> Result<bool> {
        Ok(self.processed.lock().unwrap().iter().any(|r| r.url == url))
    }

    async fn insert_processed(&self, rfp: &ProcessedRfp) -> Result<()> {
        let mut processed = self.processed.lock().unwrap();
        if !processed.iter().any(|r| r.hash == rfp.hash) {
            processed.push(rfp.clone());
        }
        Ok(())
    }

    async fn exclusion_exists(&self, hash: &str) -> Result<bool> {
        Ok(self.exclusion_hashes.lock().unwrap().contains(hash))
    }

    async fn insert_exclusion(&self, exclusion: &RfpExclusion) -> Result<()> {
        self.exclusion_hashes
            .lock()
            .unwrap()
            .insert(exclusion.hash.clone());
        self.exclusions.lock().unwrap().push(exclusion.clone());
        Ok(())
    }

    async fn recent_exclusions(&self, _domain: &str, limit: i64) -> Result<Vec<KnownItem>> {
        Ok(self
            .exclusions
            .lock()
            .unwrap()
            .iter()
            .rev()
            .take(limit as usize)
            .map(|e| KnownItem {
                title: e.title.clone(),
                url: e.detail_url.clone().unwrap_or_else(|| e.listing_url.clone()),
            })
            .collect())
    }

    async fn enabled_websites(&self) -> Result<Vec<Website>> {
        Ok(self.websites.lock().unwrap().clone())
    }
}

fn config() -> CrawlerConfig {
    CrawlerConfig {
        today_override: Some(chrono::NaiveDate::from_ymd_opt(2025, 6, 8).unwrap()),
        ..Default::default()
    }
}

fn active_check() -> String {
    json!({"status": "active", "reason": "future deadline", "matched_text": "", "deadline_iso": "2999-01-01"})
        .to_string()
}

fn in_scope() -> String {
    json!({"in_scope": true, "reason": "health data systems"}).to_string()
}

#[tokio::test]
async fn direct_pdf_is_stored_with_bytes() {
    let storage = MemoryStorage::default();
    storage.seed_website("portal", "https://portal.example/rfps");

    let mut fetcher = FixtureFetcher::default();
    fetcher.add_html(
        "https://portal.example/rfps",
        r#"<html><body><ul><li>RFP X <a href="/files/rfp.pdf">Download</a></li></ul></body></html>"#,
    );
    fetcher.add_pdf("https://portal.example/files/rfp.pdf");

    let model = ScriptedModel::new(vec![
        json!({"items": [{"title": "RFP X", "url": "https://portal.example/files/rfp.pdf", "detail_link_index": 0}]}).to_string(),
        active_check(),
        in_scope(),
    ]);

    let report = run_pipeline(&fetcher, &model, &storage, &config(), &RunLog::default())
        .await
        .unwrap();

    assert_eq!(report.new_count(), 1);
    let rows = storage.processed();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].url, "https://portal.example/files/rfp.pdf");
    assert_eq!(rows[0].title, "RFP X");
    assert!(rows[0].pdf_content.is_some());
}

#[tokio::test]
async fn two_hops_reach_the_pdf() {
    let storage = MemoryStorage::default();
    storage.seed_website("portal", "https://portal.example/rfps");

    let mut fetcher = FixtureFetcher::default();
    fetcher.add_html(
        "https://portal.example/rfps",
        r#"<html><body><ul><li>Surveillance Modernization RFP
           <a href="/rfps/surveillance">Learn more</a></li></ul></body></html>"#,
    );
    fetcher.add_html(
        "https://portal.example/rfps/surveillance",
        r#"<html><body><h1>Surveillance Modernization RFP</h1>
           <a href="/files/surveillance.pdf">Download the RFP</a></body></html>"#,
    );
    fetcher.add_pdf("https://portal.example/files/surveillance.pdf");

    let model = ScriptedModel::new(vec![
        json!({"items": [{"title": "Surveillance Modernization RFP", "url": "https://portal.example/rfps/surveillance", "detail_link_index": 0}]}).to_string(),
        json!({"status": "continue", "reason": "pdf is one more hop", "next_link_index": 0}).to_string(),
        active_check(),
        in_scope(),
    ]);

    let report = run_pipeline(&fetcher, &model, &storage, &config(), &RunLog::default())
        .await
        .unwrap();

    assert_eq!(report.new_count(), 1);
    assert_eq!(
        storage.processed()[0].url,
        "https://portal.example/files/surveillance.pdf"
    );
}

#[tokio::test]
async fn expired_final_page_writes_exclusion_only() {
    let storage = MemoryStorage::default();
    storage.seed_website("portal", "https://portal.example/rfps");

    let mut fetcher = FixtureFetcher::default();
    fetcher.add_html(
        "https://portal.example/rfps",
        r#"<html><body><ul><li>Stale RFP <a href="/rfps/stale">Learn more</a></li></ul></body></html>"#,
    );
    fetcher.add_html(
        "https://portal.example/rfps/stale",
        r#"<html><body><h1>Stale RFP details</h1><p>Applications Due: Jan 3 2020</p></body></html>"#,
    );

    let model = ScriptedModel::new(vec![
        json!({"items": [{"title": "Stale Opportunity RFP", "url": "https://portal.example/rfps/stale", "detail_link_index": 0}]}).to_string(),
        json!({"status": "final", "reason": "full details here", "final": {"title": "Stale Opportunity RFP", "url": "https://portal.example/rfps/stale"}}).to_string(),
        json!({"status": "expired", "reason": "Applications Due: Jan 3 2020", "matched_text": "Applications Due: Jan 3 2020", "deadline_iso": "2020-01-03"}).to_string(),
    ]);

    let report = run_pipeline(&fetcher, &model, &storage, &config(), &RunLog::default())
        .await
        .unwrap();

    assert_eq!(report.new_count(), 0);
    assert!(storage.processed().is_empty());
    let exclusions = storage.exclusions();
    assert!(!exclusions.is_empty());
    assert!(exclusions.iter().all(|e| e.reason == ExclusionReason::Expired));
}

#[tokio::test]
async fn out_of_scope_final_page_writes_exclusion() {
    let storage = MemoryStorage::default();
    storage.seed_website("portal", "https://portal.example/rfps");

    let mut fetcher = FixtureFetcher::default();
    fetcher.add_html(
        "https://portal.example/rfps",
        r#"<html><body><ul><li>Parking Garage Construction
           <a href="/rfps/garage">Learn more</a></li></ul></body></html>"#,
    );
    fetcher.add_html(
        "https://portal.example/rfps/garage",
        r#"<html><body><h1>Parking Garage Construction</h1><p>Build a garage. Due: June 1, 2031</p></body></html>"#,
    );

    let model = ScriptedModel::new(vec![
        json!({"items": [{"title": "Parking Garage Construction", "url": "https://portal.example/rfps/garage", "detail_link_index": 0}]}).to_string(),
        json!({"status": "final", "reason": "details", "final": {"title": "Parking Garage Construction", "url": "https://portal.example/rfps/garage"}}).to_string(),
        active_check(),
        json!({"in_scope": false, "reason": "construction, not healthcare IT"}).to_string(),
    ]);

    let report = run_pipeline(&fetcher, &model, &storage, &config(), &RunLog::default())
        .await
        .unwrap();

    assert_eq!(report.new_count(), 0);
    assert!(storage.processed().is_empty());
    assert!(storage
        .exclusions()
        .iter()
        .all(|e| e.reason == ExclusionReason::OutOfScope));
}

#[tokio::test]
async fn kendo_grid_items_all_reach_storage() {
    let storage = MemoryStorage::default();
    storage.seed_website("portal", "https://portal.example/rfps");

    let mut fetcher = FixtureFetcher::default();
    fetcher.add_html(
        "https://portal.example/rfps",
        r#"<html><body><div id="grid"></div><script>
            var ds = new kendo.data.DataSource({
                transport: { read: { url: "/RFP/Read" } }
            });
        </script></body></html>"#,
    );
    fetcher.add_grid(
        "https://portal.example/RFP/Read",
        json!({"Data": [
            {"Title": "Registry Platform RFP", "FileUrl": "/files/registry.pdf", "DateExpiration": "12/31/2030"},
            {"Title": "Surveillance Feeds RFP", "FileUrl": "/files/feeds.pdf", "DateExpiration": "11/30/2030"},
            {"Title": "HIE Interop RFP", "FileUrl": "/files/hie.pdf", "DateExpiration": "10/31/2030"}
        ]}),
    );
    fetcher.add_pdf("https://portal.example/files/registry.pdf");
    fetcher.add_pdf("https://portal.example/files/feeds.pdf");
    fetcher.add_pdf("https://portal.example/files/hie.pdf");

    let model = ScriptedModel::new(vec![
        json!({"items": [
            {"title": "Registry Platform RFP", "url": "https://portal.example/files/registry.pdf", "detail_link_index": 0},
            {"title": "Surveillance Feeds RFP", "url": "https://portal.example/files/feeds.pdf", "detail_link_index": 1},
            {"title": "HIE Interop RFP", "url": "https://portal.example/files/hie.pdf", "detail_link_index": 2}
        ]})
        .to_string(),
        active_check(),
        in_scope(),
        active_check(),
        in_scope(),
        active_check(),
        in_scope(),
    ]);

    let report = run_pipeline(&fetcher, &model, &storage, &config(), &RunLog::default())
        .await
        .unwrap();

    assert_eq!(report.new_count(), 3);
    let rows = storage.processed();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.url != "https://portal.example/rfps"));
    assert!(rows.iter().all(|r| r.url.ends_with(".pdf")));
}

#[tokio::test]
async fn second_run_inserts_nothing() {
    let storage = MemoryStorage::default();
    storage.seed_website("portal", "https://portal.example/rfps");

    let mut fetcher = FixtureFetcher::default();
    fetcher.add_html(
        "https://portal.example/rfps",
        r#"<html><body><ul><li>RFP X <a href="/files/rfp.pdf">Download</a></li></ul></body></html>"#,
    );
    fetcher.add_pdf("https://portal.example/files/rfp.pdf");

    let listing_answer = json!({"items": [{"title": "RFP X", "url": "https://portal.example/files/rfp.pdf", "detail_link_index": 0}]}).to_string();

    let model = ScriptedModel::new(vec![listing_answer.clone(), active_check(), in_scope()]);
    let first = run_pipeline(&fetcher, &model, &storage, &config(), &RunLog::default())
        .await
        .unwrap();
    assert_eq!(first.new_count(), 1);

    // A faithful model would skip known items, but even if it re-proposes
    // the same row, final-URL dedup keeps the second run empty.
    let model = ScriptedModel::new(vec![listing_answer, active_check(), in_scope()]);
    let second = run_pipeline(&fetcher, &model, &storage, &config(), &RunLog::default())
        .await
        .unwrap();
    assert_eq!(second.new_count(), 0);
    assert_eq!(storage.processed().len(), 1);
}

#[tokio::test]
async fn excluded_item_never_navigates_again() {
    let storage = MemoryStorage::default();
    storage.seed_website("portal", "https://portal.example/rfps");

    let mut fetcher = FixtureFetcher::default();
    fetcher.add_html(
        "https://portal.example/rfps",
        r#"<html><body><ul><li>Stale RFP <a href="/rfps/stale">Learn more</a></li></ul></body></html>"#,
    );
    fetcher.add_html(
        "https://portal.example/rfps/stale",
        r#"<html><body><h1>Stale</h1></body></html>"#,
    );

    let listing_answer = json!({"items": [{"title": "Stale Opportunity RFP", "url": "https://portal.example/rfps/stale", "detail_link_index": 0}]}).to_string();
    let model = ScriptedModel::new(vec![
        listing_answer.clone(),
        json!({"status": "final", "reason": "", "final": {"url": "https://portal.example/rfps/stale"}}).to_string(),
        json!({"status": "expired", "reason": "closed", "matched_text": "", "deadline_iso": "2020-01-03"}).to_string(),
    ]);
    run_pipeline(&fetcher, &model, &storage, &config(), &RunLog::default())
        .await
        .unwrap();
    let exclusions_after_first = storage.exclusions().len();
    assert!(exclusions_after_first > 0);

    // Second run: only the listing call happens; the pre-navigation
    // exclusion check drops the item before any navigation.
    let model = ScriptedModel::new(vec![listing_answer]);
    let second = run_pipeline(&fetcher, &model, &storage, &config(), &RunLog::default())
        .await
        .unwrap();
    assert_eq!(second.new_count(), 0);
    assert_eq!(model.calls(), 1);
    assert_eq!(storage.exclusions().len(), exclusions_after_first);
}
