//! Model invocation.
//!
//! The wire format is the Bedrock Anthropic messages contract, spoken
//! directly over HTTP with a bearer token. The `LanguageModel` trait is the
//! seam the pipeline mocks in tests.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::CrawlerConfig;
use crate::fetch::post_json_with_retries;
use crate::json_repair::extract_json;

pub const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-call knobs. Temperature 0 keeps extraction deterministic.
#[derive(Debug, Clone)]
pub struct LlmOptions {
    pub system: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: u32,
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self {
            system: None,
            temperature: Some(0.0),
            max_tokens: 8000,
        }
    }
}

impl LlmOptions {
    pub fn with_system(system: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            ..Default::default()
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Send one prompt and return the raw completion text.
    async fn complete(&self, prompt: &str, options: &LlmOptions) -> Result<String>;
}

/// Call the model and parse its reply as a JSON object, with repair.
pub async fn complete_json(
    llm: &dyn LanguageModel,
    prompt: &str,
    options: &LlmOptions,
) -> Result<Value> {
    let raw = llm.complete(prompt, options).await?;
    extract_json(&raw).with_context(|| {
        format!(
            "Model returned unparseable JSON (first 200 chars): {}",
            raw.chars().take(200).collect::<String>()
        )
    })
}

/// Bedrock-hosted Claude spoken to over plain HTTP.
pub struct BedrockClient {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    retries: u32,
}

impl BedrockClient {
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        let token = env::var("AWS_BEARER_TOKEN_BEDROCK")
            .context("AWS_BEARER_TOKEN_BEDROCK must be set")?;
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()
            .context("Failed to create Bedrock HTTP client")?;
        info!(
            endpoint = %config.bedrock_endpoint,
            model = %config.bedrock_model_id,
            region = %config.bedrock_region,
            "Using Bedrock model"
        );
        Ok(Self {
            client,
            endpoint: config.bedrock_endpoint.clone(),
            token,
            retries: config.bedrock_retries,
        })
    }
}

#[async_trait]
impl LanguageModel for BedrockClient {
    async fn complete(&self, prompt: &str, options: &LlmOptions) -> Result<String> {
        let mut payload = json!({
            "anthropic_version": ANTHROPIC_VERSION,
            "max_tokens": options.max_tokens,
            "messages": [
                {"role": "user", "content": prompt}
            ],
        });
        if let Some(system) = &options.system {
            payload["system"] = json!(system);
        }
        if let Some(temperature) = options.temperature {
            payload["temperature"] = json!(temperature);
        }

        debug!(prompt_chars = prompt.len(), "Sending model request");
        let resp = post_json_with_retries(
            &self.client,
            &self.endpoint,
            &self.token,
            &payload,
            self.retries,
        )
        .await?;

        let status = resp.status();
        let resp = resp
            .error_for_status()
            .with_context(|| format!("Model endpoint returned HTTP {status}"))?;

        let body: Value = resp
            .json()
            .await
            .context("Model endpoint returned non-JSON")?;
        let text = body
            .get("content")
            .and_then(Value::as_array)
            .and_then(|arr| arr.first())
            .and_then(|block| block.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        debug!(completion_chars = text.len(), "Model responded");
        Ok(text)
    }
}
