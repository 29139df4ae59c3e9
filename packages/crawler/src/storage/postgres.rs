use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use super::{advance_next_run, Storage};
use crate::types::{
    EmailSettings, ExclusionReason, KnownItem, ProcessedRfp, RfpExclusion, ScrapeConfig, Website,
};

pub struct PostgresStorage {
    pool: PgPool,
}

/// Summary row for listings in the admin API.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RfpSummary {
    pub hash: String,
    pub title: String,
    pub url: String,
    pub site: String,
    pub processed_at: DateTime<Utc>,
    pub has_pdf: bool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Admin: processed rows
    // ------------------------------------------------------------------

    pub async fn list_processed(&self) -> Result<Vec<RfpSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT hash, title, url, site, processed_at, pdf_content IS NOT NULL AS has_pdf
            FROM processed_rfps
            ORDER BY processed_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list processed RFPs")?;

        Ok(rows
            .into_iter()
            .map(|r| RfpSummary {
                hash: r.get("hash"),
                title: r.get("title"),
                url: r.get("url"),
                site: r.get("site"),
                processed_at: r.get("processed_at"),
                has_pdf: r.get("has_pdf"),
            })
            .collect())
    }

    pub async fn get_processed(&self, hash: &str) -> Result<Option<ProcessedRfp>> {
        let row = sqlx::query(
            r#"
            SELECT hash, title, url, site, processed_at, detail_content, ai_summary, pdf_content
            FROM processed_rfps
            WHERE hash = $1
            "#,
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get processed RFP")?;

        Ok(row.map(|r| ProcessedRfp {
            hash: r.get("hash"),
            title: r.get("title"),
            url: r.get("url"),
            site: r.get("site"),
            processed_at: r.get("processed_at"),
            detail_content: r.get("detail_content"),
            ai_summary: r.get("ai_summary"),
            pdf_content: r.get("pdf_content"),
        }))
    }

    pub async fn get_pdf(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT pdf_content FROM processed_rfps WHERE hash = $1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to get PDF bytes")?;
        Ok(row.and_then(|r| r.get("pdf_content")))
    }

    pub async fn delete_processed(&self, hash: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM processed_rfps WHERE hash = $1")
            .bind(hash)
            .execute(&self.pool)
            .await
            .context("Failed to delete processed RFP")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn clear_processed(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM processed_rfps")
            .execute(&self.pool)
            .await
            .context("Failed to clear processed RFPs")?;
        Ok(result.rows_affected())
    }

    // ------------------------------------------------------------------
    // Admin: exclusions
    // ------------------------------------------------------------------

    pub async fn list_exclusions(&self) -> Result<Vec<RfpExclusion>> {
        let rows = sqlx::query(
            r#"
            SELECT hash, reason, title, site, listing_url, detail_url, decided_at
            FROM rfp_exclusions
            ORDER BY decided_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list exclusions")?;

        Ok(rows
            .into_iter()
            .map(|r| RfpExclusion {
                hash: r.get("hash"),
                reason: ExclusionReason::parse(r.get("reason"))
                    .unwrap_or(ExclusionReason::Unknown),
                title: r.get("title"),
                site: r.get("site"),
                listing_url: r.get("listing_url"),
                detail_url: r.get("detail_url"),
                decided_at: r.get("decided_at"),
            })
            .collect())
    }

    pub async fn clear_exclusions(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rfp_exclusions")
            .execute(&self.pool)
            .await
            .context("Failed to clear exclusions")?;
        Ok(result.rows_affected())
    }

    // ------------------------------------------------------------------
    // Scheduler config
    // ------------------------------------------------------------------

    pub async fn get_or_create_scrape_config(&self) -> Result<ScrapeConfig> {
        sqlx::query("INSERT INTO scrape_config (id) VALUES ('singleton') ON CONFLICT (id) DO NOTHING")
            .execute(&self.pool)
            .await
            .context("Failed to seed scrape config")?;
        let row = sqlx::query(
            "SELECT enabled, interval_hours, last_run_at, next_run_at FROM scrape_config WHERE id = 'singleton'",
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to read scrape config")?;
        Ok(ScrapeConfig {
            enabled: row.get("enabled"),
            interval_hours: row.get("interval_hours"),
            last_run_at: row.get("last_run_at"),
            next_run_at: row.get("next_run_at"),
        })
    }

    pub async fn update_scrape_config(
        &self,
        enabled: bool,
        interval_hours: f64,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<ScrapeConfig> {
        self.get_or_create_scrape_config().await?;
        sqlx::query(
            r#"
            UPDATE scrape_config
            SET enabled = $1, interval_hours = $2, next_run_at = $3, updated_at = now()
            WHERE id = 'singleton'
            "#,
        )
        .bind(enabled)
        .bind(interval_hours)
        .bind(next_run_at)
        .execute(&self.pool)
        .await
        .context("Failed to update scrape config")?;
        self.get_or_create_scrape_config().await
    }

    pub async fn mark_run_finished(&self, now: DateTime<Utc>) -> Result<()> {
        let config = self.get_or_create_scrape_config().await?;
        let next = now + chrono::Duration::milliseconds(
            ((config.interval_hours * 3_600_000.0) as i64).max(60_000),
        );
        sqlx::query(
            r#"
            UPDATE scrape_config
            SET last_run_at = $1, next_run_at = $2, updated_at = now()
            WHERE id = 'singleton'
            "#,
        )
        .bind(now)
        .bind(next)
        .execute(&self.pool)
        .await
        .context("Failed to record run completion")?;
        Ok(())
    }

    pub async fn reset_scrape_config(&self) -> Result<()> {
        sqlx::query("DELETE FROM scrape_config WHERE id = 'singleton'")
            .execute(&self.pool)
            .await
            .context("Failed to reset scrape config")?;
        Ok(())
    }

    /// Claim a due run under a row lock. Exactly one caller observes the
    /// pre-advance `next_run_at`; everyone else sees it already moved.
    pub async fn claim_due_run(&self, now: DateTime<Utc>) -> Result<Option<ScrapeConfig>> {
        let mut tx = self.pool.begin().await.context("Failed to open claim transaction")?;
        sqlx::query("INSERT INTO scrape_config (id) VALUES ('singleton') ON CONFLICT (id) DO NOTHING")
            .execute(&mut *tx)
            .await
            .context("Failed to seed scrape config")?;
        let row = sqlx::query(
            r#"
            SELECT enabled, interval_hours, last_run_at, next_run_at
            FROM scrape_config
            WHERE id = 'singleton'
            FOR UPDATE
            "#,
        )
        .fetch_one(&mut *tx)
        .await
        .context("Failed to lock scrape config")?;

        let enabled: bool = row.get("enabled");
        let interval_hours: f64 = row.get("interval_hours");
        let next_run_at: Option<DateTime<Utc>> = row.get("next_run_at");

        let due_at = next_run_at.filter(|t| enabled && *t <= now);
        let Some(due_at) = due_at else {
            tx.commit().await.context("Failed to release claim lock")?;
            return Ok(None);
        };

        let advanced = advance_next_run(due_at, interval_hours, now);
        sqlx::query(
            r#"
            UPDATE scrape_config
            SET next_run_at = $1, last_run_at = $2, updated_at = now()
            WHERE id = 'singleton'
            "#,
        )
        .bind(advanced)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to advance schedule")?;
        tx.commit().await.context("Failed to commit claim")?;

        Ok(Some(ScrapeConfig {
            enabled,
            interval_hours,
            last_run_at: Some(now),
            next_run_at: Some(advanced),
        }))
    }

    // ------------------------------------------------------------------
    // Email settings
    // ------------------------------------------------------------------

    pub async fn get_or_create_email_settings(&self) -> Result<EmailSettings> {
        sqlx::query("INSERT INTO email_settings (id) VALUES ('singleton') ON CONFLICT (id) DO NOTHING")
            .execute(&self.pool)
            .await
            .context("Failed to seed email settings")?;
        let row = sqlx::query(
            "SELECT main_recipients, debug_recipients FROM email_settings WHERE id = 'singleton'",
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to read email settings")?;
        let Json(main_recipients): Json<Vec<String>> = row.get("main_recipients");
        let Json(debug_recipients): Json<Vec<String>> = row.get("debug_recipients");
        Ok(EmailSettings {
            main_recipients,
            debug_recipients,
        })
    }

    pub async fn update_email_settings(&self, settings: &EmailSettings) -> Result<EmailSettings> {
        self.get_or_create_email_settings().await?;
        sqlx::query(
            r#"
            UPDATE email_settings
            SET main_recipients = $1, debug_recipients = $2, updated_at = now()
            WHERE id = 'singleton'
            "#,
        )
        .bind(Json(&settings.main_recipients))
        .bind(Json(&settings.debug_recipients))
        .execute(&self.pool)
        .await
        .context("Failed to update email settings")?;
        self.get_or_create_email_settings().await
    }

    // ------------------------------------------------------------------
    // Website settings
    // ------------------------------------------------------------------

    pub async fn list_websites(&self) -> Result<Vec<Website>> {
        let rows = sqlx::query("SELECT id, name, url, enabled FROM website_settings ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list websites")?;
        Ok(rows.into_iter().map(website_from_row).collect())
    }

    pub async fn create_website(&self, name: &str, url: &str, enabled: bool) -> Result<Website> {
        let row = sqlx::query(
            r#"
            INSERT INTO website_settings (name, url, enabled)
            VALUES ($1, $2, $3)
            RETURNING id, name, url, enabled
            "#,
        )
        .bind(name)
        .bind(url)
        .bind(enabled)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create website")?;
        Ok(website_from_row(row))
    }

    pub async fn update_website(
        &self,
        id: i32,
        name: &str,
        url: &str,
        enabled: bool,
    ) -> Result<Option<Website>> {
        let row = sqlx::query(
            r#"
            UPDATE website_settings
            SET name = $2, url = $3, enabled = $4, updated_at = now()
            WHERE id = $1
            RETURNING id, name, url, enabled
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(url)
        .bind(enabled)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update website")?;
        Ok(row.map(website_from_row))
    }

    pub async fn delete_website(&self, id: i32) -> Result<bool> {
        let result = sqlx::query("DELETE FROM website_settings WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete website")?;
        Ok(result.rows_affected() > 0)
    }
}

fn website_from_row(row: sqlx::postgres::PgRow) -> Website {
    Website {
        id: row.get("id"),
        name: row.get("name"),
        url: row.get("url"),
        enabled: row.get("enabled"),
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn recent_processed(&self, domain: &str, limit: i64) -> Result<Vec<KnownItem>> {
        let rows = sqlx::query(
            r#"
            SELECT title, url
            FROM processed_rfps
            WHERE url ILIKE $1
            ORDER BY processed_at DESC
            LIMIT $2
            "#,
        )
        .bind(format!("%{domain}%"))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load recent processed rows")?;

        let rows = if rows.is_empty() {
            sqlx::query(
                r#"
                SELECT title, url
                FROM processed_rfps
                ORDER BY processed_at DESC
                LIMIT $1
                "#,
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load recent processed rows")?
        } else {
            rows
        };

        Ok(rows
            .into_iter()
            .map(|r| KnownItem {
                title: r.get("title"),
                url: r.get("url"),
            })
            .collect())
    }

    async fn processed_url_exists(&self, url: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS one FROM processed_rfps WHERE url = $1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to check processed URL")?;
        Ok(row.is_some())
    }

    async fn insert_processed(&self, rfp: &ProcessedRfp) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO processed_rfps (
                hash, title, url, site, processed_at, detail_content, ai_summary, pdf_content
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&rfp.hash)
        .bind(&rfp.title)
        .bind(&rfp.url)
        .bind(&rfp.site)
        .bind(rfp.processed_at)
        .bind(&rfp.detail_content)
        .bind(&rfp.ai_summary)
        .bind(&rfp.pdf_content)
        .execute(&self.pool)
        .await
        .context("Failed to insert processed RFP")?;
        Ok(())
    }

    async fn exclusion_exists(&self, hash: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS one FROM rfp_exclusions WHERE hash = $1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to check exclusion")?;
        Ok(row.is_some())
    }

    async fn insert_exclusion(&self, exclusion: &RfpExclusion) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rfp_exclusions (
                hash, reason, title, site, listing_url, detail_url, decided_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&exclusion.hash)
        .bind(exclusion.reason.as_str())
        .bind(&exclusion.title)
        .bind(&exclusion.site)
        .bind(&exclusion.listing_url)
        .bind(&exclusion.detail_url)
        .bind(exclusion.decided_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert exclusion")?;
        Ok(())
    }

    async fn recent_exclusions(&self, domain: &str, limit: i64) -> Result<Vec<KnownItem>> {
        let rows = sqlx::query(
            r#"
            SELECT title, COALESCE(detail_url, listing_url) AS url
            FROM rfp_exclusions
            WHERE listing_url ILIKE $1 AND reason IN ('out_of_scope', 'expired')
            ORDER BY decided_at DESC
            LIMIT $2
            "#,
        )
        .bind(format!("%{domain}%"))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load recent exclusions")?;

        Ok(rows
            .into_iter()
            .map(|r| KnownItem {
                title: r.get("title"),
                url: r.get("url"),
            })
            .collect())
    }

    async fn enabled_websites(&self) -> Result<Vec<Website>> {
        let rows = sqlx::query(
            "SELECT id, name, url, enabled FROM website_settings WHERE enabled ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list enabled websites")?;
        Ok(rows.into_iter().map(website_from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::processed_hash;

    async fn connect() -> PostgresStorage {
        let url = std::env::var("PGVECTOR_CONNECTION").expect("PGVECTOR_CONNECTION must be set");
        let pool = PgPool::connect(&url).await.expect("connect");
        PostgresStorage::new(pool)
    }

    #[tokio::test]
    #[ignore] // Requires PGVECTOR_CONNECTION and a migrated database
    async fn test_insert_is_idempotent() {
        let storage = connect().await;
        let rfp = ProcessedRfp {
            hash: processed_hash("https://test.example/rfp-idempotent.pdf"),
            title: "Idempotency Probe".into(),
            url: "https://test.example/rfp-idempotent.pdf".into(),
            site: "test".into(),
            processed_at: Utc::now(),
            detail_content: Some("body".into()),
            ai_summary: None,
            pdf_content: None,
        };
        storage.insert_processed(&rfp).await.unwrap();
        storage.insert_processed(&rfp).await.unwrap();
        assert!(storage.processed_url_exists(&rfp.url).await.unwrap());
        storage.delete_processed(&rfp.hash).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires PGVECTOR_CONNECTION and a migrated database
    async fn test_claim_due_run_single_winner() {
        let storage = connect().await;
        let now = Utc::now();
        storage
            .update_scrape_config(true, 1.0, Some(now - chrono::Duration::minutes(1)))
            .await
            .unwrap();
        let first = storage.claim_due_run(now).await.unwrap();
        let second = storage.claim_due_run(now).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
        assert!(first.unwrap().next_run_at.unwrap() > now);
    }
}
