//! Shared mock implementations of the seam traits for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::fetch::{FetchedResponse, PageFetcher};
use crate::llm::{LanguageModel, LlmOptions};
use crate::storage::Storage;
use crate::types::{KnownItem, ProcessedRfp, RfpExclusion, Website};

#[derive(Default)]
pub struct MockFetcher {
    pages: HashMap<String, FetchedResponse>,
    grids: HashMap<String, Value>,
}

impl MockFetcher {
    pub fn add_html(&mut self, url: &str, html: &str) {
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

    pub fn add_pdf(&mut self, url: &str, body: &[u8]) {
        self.pages.insert(
            url.to_string(),
            FetchedResponse {
                final_url: url.to_string(),
                status: 200,
                content_type: "application/pdf".to_string(),
                content_disposition: String::new(),
                body: Bytes::copy_from_slice(body),
            },
        );
    }

    pub fn add_grid(&mut self, url: &str, data: Value) {
        self.grids.insert(url.to_string(), data);
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
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

/// Replays a fixed sequence of completions, in order.
pub struct ScriptedModel {
    responses: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(responses: Vec<String>) -> Self {
        let mut responses = responses;
        responses.reverse();
        Self {
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
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
pub struct MockStorage {
    processed: Mutex<Vec<ProcessedRfp>>,
    exclusions: Mutex<Vec<RfpExclusion>>,
    exclusion_hashes: Mutex<HashSet<String>>,
    websites: Mutex<Vec<Website>>,
}

impl MockStorage {
    pub fn seed_exclusion_hash(&self, hash: &str) {
        self.exclusion_hashes.lock().unwrap().insert(hash.to_string());
    }

    pub fn seed_processed(&self, rfp: ProcessedRfp) {
        self.processed.lock().unwrap().push(rfp);
    }

    pub fn seed_website(&self, website: Website) {
        self.websites.lock().unwrap().push(website);
    }

    pub fn processed(&self) -> Vec<ProcessedRfp> {
        self.processed.lock().unwrap().clone()
    }

    pub fn exclusions(&self) -> Vec<RfpExclusion> {
        self.exclusions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Storage for MockStorage {
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
        Ok(self
            .websites
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.enabled)
            .cloned()
            .collect())
    }
}
