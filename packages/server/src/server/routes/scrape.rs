use axum::extract::{Extension, Query};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{internal_error, ApiError};
use crate::scheduler::execute_run;
use crate::server::app::AppState;
use rfp_crawler::NewRfp;

#[derive(Deserialize)]
pub struct ScrapeParams {
    pub send_main: Option<bool>,
    pub send_debug: Option<bool>,
}

#[derive(Serialize)]
pub struct ScrapeResponse {
    pub new_count: usize,
    pub new_rfps: Vec<NewRfp>,
}

/// Imperative run in the caller's request context. Also advances the
/// schedule the way a completed scheduled run would.
pub async fn trigger_scrape(
    Extension(state): Extension<AppState>,
    Query(params): Query<ScrapeParams>,
) -> Result<Json<ScrapeResponse>, ApiError> {
    let report = execute_run(
        &state,
        params.send_main.unwrap_or(true),
        params.send_debug.unwrap_or(false),
    )
    .await
    .map_err(internal_error)?;

    state
        .storage
        .mark_run_finished(chrono::Utc::now())
        .await
        .map_err(internal_error)?;

    Ok(Json(ScrapeResponse {
        new_count: report.new_count(),
        new_rfps: report.new_rfps,
    }))
}
