//! HTTP access for site traffic and the model endpoint.
//!
//! One cookie-carrying client is shared per run. Every outbound request
//! carries a desktop browser profile and a `Referer` of the page origin
//! (or the referring page during navigation).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use tracing::warn;
use url::Url;

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/125.0.0.0 Safari/537.36";
pub const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
pub const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
pub const ACCEPT_PDF: &str = "application/pdf,*/*;q=0.9";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(20);

/// A fetched response with everything the content extractor needs to
/// classify it, after redirects.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub final_url: String,
    pub status: u16,
    pub content_type: String,
    pub content_disposition: String,
    pub body: Bytes,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Network seam for everything that touches target sites.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// GET a URL following redirects. Fails on non-success status.
    async fn get(
        &self,
        url: &str,
        referer: Option<&str>,
        accept: Option<&str>,
    ) -> Result<FetchedResponse>;

    /// Fetch a grid data endpoint as JSON, falling back from GET to a
    /// token-bearing POST when the endpoint rejects plain reads.
    async fn get_grid_json(&self, url: &str, referer: &str, token: Option<&str>) -> Result<Value>;
}

/// Production fetcher backed by a shared `reqwest` session.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            ACCEPT_HTML.parse().context("static header")?,
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            ACCEPT_LANGUAGE.parse().context("static header")?,
        );

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .cookie_store(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

/// `scheme://host[:port]` of a URL, used as the default Referer.
pub fn origin(url: &str) -> String {
    match Url::parse(url) {
        Ok(u) => {
            let origin = u.origin();
            if origin.is_tuple() {
                origin.ascii_serialization()
            } else {
                url.to_string()
            }
        }
        Err(_) => url.to_string(),
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn get(
        &self,
        url: &str,
        referer: Option<&str>,
        accept: Option<&str>,
    ) -> Result<FetchedResponse> {
        let referer = referer.map(str::to_string).unwrap_or_else(|| origin(url));
        let mut req = self.client.get(url).header(reqwest::header::REFERER, referer);
        if let Some(accept) = accept {
            req = req.header(reqwest::header::ACCEPT, accept);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {status} for {url}");
        }

        let final_url = resp.url().to_string();
        let content_type = header_string(resp.headers(), reqwest::header::CONTENT_TYPE);
        let content_disposition = header_string(resp.headers(), reqwest::header::CONTENT_DISPOSITION);
        let body = resp
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of {url}"))?;

        Ok(FetchedResponse {
            final_url,
            status: status.as_u16(),
            content_type,
            content_disposition,
            body,
        })
    }

    async fn get_grid_json(&self, url: &str, referer: &str, token: Option<&str>) -> Result<Value> {
        let resp = self
            .client
            .get(url)
            .query(&[("page", "1"), ("pageSize", "50"), ("skip", "0"), ("take", "50")])
            .header(reqwest::header::REFERER, referer)
            .header(reqwest::header::ACCEPT, "application/json, text/javascript, */*; q=0.01")
            .header("X-Requested-With", "XMLHttpRequest")
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;

        let resp = if resp.status().as_u16() >= 400 {
            warn!(url = %url, status = %resp.status(), "Grid GET rejected; retrying as POST");
            let body = json!({"take": 50, "skip": 0, "page": 1, "pageSize": 50, "sort": []});
            let mut req = self
                .client
                .post(url)
                .header(reqwest::header::REFERER, referer)
                .header(reqwest::header::ACCEPT, "application/json, text/javascript, */*; q=0.01")
                .header("X-Requested-With", "XMLHttpRequest")
                .json(&body);
            if let Some(token) = token {
                req = req.header("RequestVerificationToken", token);
            }
            req.send()
                .await
                .with_context(|| format!("POST {url} failed"))?
        } else {
            resp
        };

        let resp = resp
            .error_for_status()
            .with_context(|| format!("Grid endpoint {url} returned an error"))?;
        resp.json()
            .await
            .with_context(|| format!("Grid endpoint {url} returned non-JSON"))
    }
}

/// POST a JSON payload with bounded retries: 429, 5xx, and connection
/// errors back off `min(2^attempt, 10)s` plus up to 500ms of jitter.
pub async fn post_json_with_retries(
    client: &reqwest::Client,
    url: &str,
    bearer_token: &str,
    payload: &Value,
    retries: u32,
) -> Result<reqwest::Response> {
    let mut attempt = 0u32;
    loop {
        let result = client
            .post(url)
            .bearer_auth(bearer_token)
            .json(payload)
            .send()
            .await;

        let err: anyhow::Error = match result {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if status == 429 || status >= 500 {
                    anyhow::anyhow!("HTTP {status}")
                } else {
                    return Ok(resp);
                }
            }
            Err(e) => e.into(),
        };

        if attempt >= retries {
            return Err(err.context(format!("POST {url} failed after {} attempts", attempt + 1)));
        }
        let backoff_secs = 2u64.saturating_pow(attempt).min(10);
        let jitter = Duration::from_millis(fastrand::u64(0..500));
        warn!(
            url = %url,
            attempt = attempt + 1,
            error = %err,
            "Request failed; retrying in {}s", backoff_secs
        );
        tokio::time::sleep(Duration::from_secs(backoff_secs) + jitter).await;
        attempt += 1;
    }
}

fn header_string(headers: &reqwest::header::HeaderMap, name: reqwest::header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}
