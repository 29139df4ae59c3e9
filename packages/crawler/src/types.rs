use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of the input string.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fingerprint for an accepted opportunity, keyed on its final URL.
pub fn processed_hash(final_url: &str) -> String {
    sha256_hex(final_url)
}

/// Fingerprint for an exclusion: title concatenated with the listing URL
/// before navigation, or with the final URL once one is known.
pub fn exclusion_hash(title: &str, url: &str) -> String {
    sha256_hex(&format!("{title}{url}"))
}

/// An accepted opportunity as stored in `processed_rfps`.
#[derive(Debug, Clone)]
pub struct ProcessedRfp {
    pub hash: String,
    pub title: String,
    pub url: String,
    pub site: String,
    pub processed_at: DateTime<Utc>,
    pub detail_content: Option<String>,
    pub ai_summary: Option<String>,
    pub pdf_content: Option<Vec<u8>>,
}

/// Why an item was permanently rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    OutOfScope,
    Expired,
    Unknown,
}

impl ExclusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OutOfScope => "out_of_scope",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "out_of_scope" => Some(Self::OutOfScope),
            "expired" => Some(Self::Expired),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// A persistent rejection preventing reprocessing of a known-bad item.
#[derive(Debug, Clone)]
pub struct RfpExclusion {
    pub hash: String,
    pub reason: ExclusionReason,
    pub title: String,
    pub site: String,
    pub listing_url: String,
    pub detail_url: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// A `title | url` pair shown to the model as already-known context.
#[derive(Debug, Clone)]
pub struct KnownItem {
    pub title: String,
    pub url: String,
}

/// A crawl target from `website_settings`.
#[derive(Debug, Clone, Serialize)]
pub struct Website {
    pub id: i32,
    pub name: String,
    pub url: String,
    pub enabled: bool,
}

/// Scheduler state, a singleton row.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeConfig {
    pub enabled: bool,
    pub interval_hours: f64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Digest recipients, a singleton row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailSettings {
    pub main_recipients: Vec<String>,
    pub debug_recipients: Vec<String>,
}

/// One candidate proposed by the listing model.
#[derive(Debug, Clone)]
pub struct ListingItem {
    pub title: String,
    pub url: String,
    pub detail_link_index: Option<i64>,
    pub detail_source_url: Option<String>,
    pub content_snippet: Option<String>,
}

impl ListingItem {
    /// Read one item out of a loosely-typed model response object.
    pub fn from_value(v: &Value) -> Option<Self> {
        let obj = v.as_object()?;
        Some(Self {
            title: str_field(obj, "title"),
            url: str_field(obj, "url"),
            detail_link_index: obj.get("detail_link_index").and_then(Value::as_i64),
            detail_source_url: opt_str_field(obj, "detail_source_url"),
            content_snippet: opt_str_field(obj, "content_snippet"),
        })
    }
}

/// The navigation model's verdict for a single hop.
#[derive(Debug, Clone, PartialEq)]
pub enum NavDecision {
    Final { title: Option<String>, url: Option<String> },
    Continue { index: Option<i64> },
    GiveUp,
    Expired,
    Unrecognized(String),
}

impl NavDecision {
    pub fn from_value(v: &Value) -> Self {
        let status = v
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_ascii_lowercase();
        match status.as_str() {
            "final" => {
                let fin = v.get("final");
                NavDecision::Final {
                    title: fin
                        .and_then(|f| f.get("title"))
                        .and_then(Value::as_str)
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty()),
                    url: fin
                        .and_then(|f| f.get("url"))
                        .and_then(Value::as_str)
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty()),
                }
            }
            "continue" => NavDecision::Continue {
                index: v.get("next_link_index").and_then(Value::as_i64),
            },
            "give_up" => NavDecision::GiveUp,
            "expired" => NavDecision::Expired,
            other => NavDecision::Unrecognized(other.to_string()),
        }
    }
}

/// Deadline classification of a final page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalStatus {
    Active,
    Expired,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct FinalCheck {
    pub status: FinalStatus,
    pub reason: String,
    pub deadline_iso: Option<NaiveDate>,
}

impl FinalCheck {
    pub fn from_value(v: &Value) -> Self {
        let status = match v
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_ascii_lowercase()
            .as_str()
        {
            "active" => FinalStatus::Active,
            "expired" => FinalStatus::Expired,
            _ => FinalStatus::Unknown,
        };
        // The model sometimes returns a full timestamp; only the date part counts.
        let deadline_iso = v
            .get("deadline_iso")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| s.len() >= 10)
            .and_then(|s| NaiveDate::parse_from_str(&s[..10], "%Y-%m-%d").ok());
        Self {
            status,
            reason: str_field_value(v, "reason"),
            deadline_iso,
        }
    }
}

/// Scope classification of a final page.
#[derive(Debug, Clone)]
pub struct ScopeCheck {
    pub in_scope: bool,
    pub reason: String,
}

impl ScopeCheck {
    pub fn from_value(v: &Value) -> Self {
        Self {
            in_scope: v.get("in_scope").and_then(Value::as_bool).unwrap_or(false),
            reason: str_field_value(v, "reason"),
        }
    }
}

/// A newly inserted row, as reported back to the caller and the digest.
#[derive(Debug, Clone, Serialize)]
pub struct NewRfp {
    pub title: String,
    pub url: String,
    pub site: String,
    pub hash: String,
    pub has_detail: bool,
    pub ai_summary: Option<String>,
}

fn str_field(obj: &serde_json::Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string()
}

fn opt_str_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn str_field_value(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string()
}
