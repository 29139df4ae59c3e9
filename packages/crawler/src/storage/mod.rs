//! Persistence model: processed opportunities, exclusions, and the
//! settings singletons. The `Storage` trait is the seam the pipeline
//! mocks; `PostgresStorage` is the production implementation.

mod postgres;

pub use postgres::{PostgresStorage, RfpSummary};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::types::{KnownItem, ProcessedRfp, RfpExclusion, Website};

#[async_trait]
pub trait Storage: Send + Sync {
    /// Most recent processed rows for a domain, newest first, falling back
    /// to the most recent rows overall when the domain has none yet.
    async fn recent_processed(&self, domain: &str, limit: i64) -> Result<Vec<KnownItem>>;

    async fn processed_url_exists(&self, url: &str) -> Result<bool>;

    async fn insert_processed(&self, rfp: &ProcessedRfp) -> Result<()>;

    async fn exclusion_exists(&self, hash: &str) -> Result<bool>;

    async fn insert_exclusion(&self, exclusion: &RfpExclusion) -> Result<()>;

    /// Recent scope/deadline exclusions for a domain, as extra known items
    /// the listing model should not re-propose.
    async fn recent_exclusions(&self, domain: &str, limit: i64) -> Result<Vec<KnownItem>>;

    async fn enabled_websites(&self) -> Result<Vec<Website>>;
}

/// Advance a due `next_run_at` by whole intervals until it is strictly in
/// the future. Catches up in one claim after downtime instead of running
/// once per missed interval.
pub fn advance_next_run(
    next_run_at: DateTime<Utc>,
    interval_hours: f64,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let step_ms = ((interval_hours * 3_600_000.0) as i64).max(60_000);
    let step = Duration::milliseconds(step_ms);
    let mut next = next_run_at;
    while next <= now {
        next += step;
    }
    next
}
