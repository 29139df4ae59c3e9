//! The single-writer scheduler: a 60-second tick loop that claims due runs
//! under a row lock, so any number of replicas can share one database.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone, Utc};
use rfp_crawler::dispatcher::{run_pipeline, RunLog, RunReport};
use tracing::{error, info, warn};

use crate::notifier::{format_debug_digest, format_digest, DEBUG_SUBJECT, MAIN_SUBJECT};
use crate::server::app::AppState;

const TICK_PERIOD: Duration = Duration::from_secs(60);

/// Resolve an `(hour, minute)` wall time in the scheduling timezone to the
/// next UTC instant: today if still ahead, otherwise tomorrow.
pub fn anchor_next_run(
    hour: u32,
    minute: u32,
    offset: FixedOffset,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let wall = NaiveTime::from_hms_opt(hour, minute, 0)?;
    let local_now = now.with_timezone(&offset);
    let candidate = offset
        .from_local_datetime(&local_now.date_naive().and_time(wall))
        .single()?;
    let candidate = if candidate.with_timezone(&Utc) <= now {
        candidate + chrono::Duration::days(1)
    } else {
        candidate
    };
    Some(candidate.with_timezone(&Utc))
}

/// Run the pipeline once and send the configured digests.
pub async fn execute_run(state: &AppState, send_main: bool, send_debug: bool) -> Result<RunReport> {
    let log = RunLog::default();
    let report = run_pipeline(
        state.fetcher.as_ref(),
        state.llm.as_ref(),
        state.storage.as_ref(),
        &state.crawler_config,
        &log,
    )
    .await
    .context("Pipeline run failed")?;

    let settings = state
        .storage
        .get_or_create_email_settings()
        .await
        .context("Failed to load email settings")?;

    if send_main && !report.new_rfps.is_empty() && !settings.main_recipients.is_empty() {
        let body = format_digest(&report.new_rfps);
        if let Err(e) = state
            .mailer
            .send(MAIN_SUBJECT, &body, &settings.main_recipients)
            .await
        {
            warn!(error = %e, "Failed to send main digest");
        }
    }
    if send_debug && !settings.debug_recipients.is_empty() {
        let body = format_debug_digest(&report.new_rfps, &log.snapshot());
        if let Err(e) = state
            .mailer
            .send(DEBUG_SUBJECT, &body, &settings.debug_recipients)
            .await
        {
            warn!(error = %e, "Failed to send debug digest");
        }
    }

    Ok(report)
}

/// Tick forever. Each claim advances the schedule inside the transaction;
/// the run itself happens after the lock is released.
pub async fn run_scheduler(state: AppState) {
    info!("Scheduler started (60s tick)");
    let mut ticker = tokio::time::interval(TICK_PERIOD);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = tick(&state).await {
            error!(error = %format!("{e:#}"), "Scheduler tick failed");
        }
    }
}

async fn tick(state: &AppState) -> Result<()> {
    let now = Utc::now();
    let Some(claimed) = state.storage.claim_due_run(now).await? else {
        return Ok(());
    };
    info!(
        next_run_at = ?claimed.next_run_at,
        "Claimed scheduled run"
    );
    let report = execute_run(state, true, true).await?;
    info!(new = report.new_count(), "Scheduled run finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    fn offset(hours: i32) -> FixedOffset {
        FixedOffset::east_opt(hours * 3600).unwrap()
    }

    #[test]
    fn test_anchor_later_today() {
        // 14:00 UTC now; 18:30 UTC target, still ahead.
        let next = anchor_next_run(18, 30, offset(0), utc("2025-06-08 14:00:00")).unwrap();
        assert_eq!(next, utc("2025-06-08 18:30:00"));
    }

    #[test]
    fn test_anchor_rolls_to_tomorrow() {
        let next = anchor_next_run(9, 0, offset(0), utc("2025-06-08 14:00:00")).unwrap();
        assert_eq!(next, utc("2025-06-09 09:00:00"));
    }

    #[test]
    fn test_anchor_respects_offset() {
        // 09:00 at UTC-5 is 14:00 UTC. At exactly 14:00 UTC it has passed,
        // so the anchor rolls to the next day.
        let next = anchor_next_run(9, 0, offset(-5), utc("2025-06-08 14:00:00")).unwrap();
        assert_eq!(next, utc("2025-06-09 14:00:00"));

        let next = anchor_next_run(9, 0, offset(-5), utc("2025-06-08 13:59:00")).unwrap();
        assert_eq!(next, utc("2025-06-08 14:00:00"));
    }

    #[test]
    fn test_anchor_rejects_invalid_time() {
        assert!(anchor_next_run(24, 0, offset(0), utc("2025-06-08 14:00:00")).is_none());
        assert!(anchor_next_run(9, 61, offset(0), utc("2025-06-08 14:00:00")).is_none());
    }
}
