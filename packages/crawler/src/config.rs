use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::env;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_MODEL_ID: &str = "us.anthropic.claude-3-7-sonnet-20250219-v1:0";

/// Pipeline configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub bedrock_endpoint: String,
    pub bedrock_model_id: String,
    pub bedrock_region: String,
    pub bedrock_retries: u32,
    pub max_detail_text_chars: usize,
    pub max_pdf_text_chars: usize,
    pub max_hops: u32,
    pub nav_page_max_text: usize,
    pub listing_max_text: usize,
    pub listing_max_links: usize,
    pub final_date_enforce: bool,
    pub today_override: Option<NaiveDate>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        let region = DEFAULT_REGION.to_string();
        let model_id = DEFAULT_MODEL_ID.to_string();
        Self {
            bedrock_endpoint: build_bedrock_endpoint(&model_id, &region),
            bedrock_model_id: model_id,
            bedrock_region: region,
            bedrock_retries: 2,
            max_detail_text_chars: 400_000,
            max_pdf_text_chars: 400_000,
            max_hops: 5,
            nav_page_max_text: 16_000,
            listing_max_text: 16_000,
            listing_max_links: 400,
            final_date_enforce: true,
            today_override: None,
        }
    }
}

impl CrawlerConfig {
    /// Load configuration from environment variables, falling back to
    /// the defaults above for anything unset.
    pub fn from_env() -> Result<Self> {
        let region = env::var("BEDROCK_REGION").unwrap_or_else(|_| DEFAULT_REGION.to_string());
        let model_id =
            env::var("BEDROCK_MODEL_ID").unwrap_or_else(|_| DEFAULT_MODEL_ID.to_string());
        let endpoint = env::var("BEDROCK_ENDPOINT")
            .unwrap_or_else(|_| build_bedrock_endpoint(&model_id, &region));

        let today_override = match env::var("TODAY_OVERRIDE") {
            Ok(v) if !v.trim().is_empty() => Some(
                NaiveDate::parse_from_str(&v.trim()[..v.trim().len().min(10)], "%Y-%m-%d")
                    .context("TODAY_OVERRIDE must be YYYY-MM-DD")?,
            ),
            _ => None,
        };

        Ok(Self {
            bedrock_endpoint: endpoint,
            bedrock_model_id: model_id,
            bedrock_region: region,
            bedrock_retries: env_usize("BEDROCK_RETRIES", 2)? as u32,
            max_detail_text_chars: env_usize("MAX_DETAIL_TEXT_CHARS", 400_000)?,
            max_pdf_text_chars: env_usize("MAX_PDF_TEXT_CHARS", 400_000)?,
            max_hops: env_usize("MAX_RFP_HOPS", 5)? as u32,
            nav_page_max_text: env_usize("NAV_PAGE_MAX_TEXT", 16_000)?,
            listing_max_text: env_usize("LISTING_MAX_TEXT", 16_000)?,
            listing_max_links: env_usize("LISTING_MAX_LINKS", 400)?,
            final_date_enforce: env_truthy("FINAL_DATE_ENFORCE", true),
            today_override,
        })
    }

    /// Today's date in UTC, honoring `TODAY_OVERRIDE` for deterministic runs.
    pub fn today(&self) -> NaiveDate {
        self.today_override
            .unwrap_or_else(|| chrono::Utc::now().date_naive())
    }
}

pub fn build_bedrock_endpoint(model_id: &str, region: &str) -> String {
    format!("https://bedrock-runtime.{region}.amazonaws.com/model/{model_id}/invoke")
}

fn env_usize(name: &str, default: usize) -> Result<usize> {
    match env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a number")),
        Err(_) => Ok(default),
    }
}

fn env_truthy(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}
