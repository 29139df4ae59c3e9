use axum::extract::Extension;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::{internal_error, ApiError, ErrorBody};
use crate::scheduler::anchor_next_run;
use crate::server::app::AppState;
use rfp_crawler::ScrapeConfig;

#[derive(Deserialize)]
pub struct ScheduleUpdate {
    pub enabled: bool,
    pub interval_hours: f64,
    pub next_run_hour: u32,
    pub next_run_minute: u32,
}

pub async fn get_schedule(
    Extension(state): Extension<AppState>,
) -> Result<Json<ScrapeConfig>, ApiError> {
    let config = state
        .storage
        .get_or_create_scrape_config()
        .await
        .map_err(internal_error)?;
    Ok(Json(config))
}

pub async fn put_schedule(
    Extension(state): Extension<AppState>,
    Json(payload): Json<ScheduleUpdate>,
) -> Result<Json<ScrapeConfig>, ApiError> {
    if payload.interval_hours <= 0.0 {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorBody {
                error: "interval_hours must be positive".to_string(),
            }),
        ));
    }
    let next_run_at = anchor_next_run(
        payload.next_run_hour,
        payload.next_run_minute,
        state.schedule_offset,
        chrono::Utc::now(),
    )
    .ok_or_else(|| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorBody {
                error: "next_run_hour/next_run_minute out of range".to_string(),
            }),
        )
    })?;

    let config = state
        .storage
        .update_scrape_config(payload.enabled, payload.interval_hours, Some(next_run_at))
        .await
        .map_err(internal_error)?;
    Ok(Json(config))
}

pub async fn delete_schedule(
    Extension(state): Extension<AppState>,
) -> Result<StatusCode, ApiError> {
    state
        .storage
        .reset_scrape_config()
        .await
        .map_err(internal_error)?;
    Ok(StatusCode::NO_CONTENT)
}
