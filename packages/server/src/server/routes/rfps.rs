use axum::extract::{Extension, Path};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use super::{internal_error, not_found, ApiError};
use crate::server::app::AppState;
use rfp_crawler::storage::PostgresStorage;

#[derive(Serialize)]
pub struct RfpDetail {
    pub hash: String,
    pub title: String,
    pub url: String,
    pub site: String,
    pub processed_at: DateTime<Utc>,
    pub detail_content: Option<String>,
    pub ai_summary: Option<String>,
    pub has_pdf: bool,
}

pub async fn list_rfps(
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state.storage.list_processed().await.map_err(internal_error)?;
    Ok(Json(rows))
}

pub async fn get_rfp(
    Extension(state): Extension<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<RfpDetail>, ApiError> {
    let row = state
        .storage
        .get_processed(&hash)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("RFP"))?;
    Ok(Json(RfpDetail {
        hash: row.hash,
        title: row.title,
        url: row.url,
        site: row.site,
        processed_at: row.processed_at,
        detail_content: row.detail_content,
        ai_summary: row.ai_summary,
        has_pdf: row.pdf_content.is_some(),
    }))
}

pub async fn get_rfp_pdf(
    Extension(state): Extension<AppState>,
    Path(hash): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let pdf = state
        .storage
        .get_pdf(&hash)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("PDF"))?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{hash}.pdf\""),
            ),
        ],
        pdf,
    ))
}

pub async fn delete_rfp(
    Extension(state): Extension<AppState>,
    Path(hash): Path<String>,
) -> Result<StatusCode, ApiError> {
    let deleted = state
        .storage
        .delete_processed(&hash)
        .await
        .map_err(internal_error)?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("RFP"))
    }
}

#[derive(Serialize)]
pub struct ExclusionRow {
    pub hash: String,
    pub reason: String,
    pub title: String,
    pub site: String,
    pub listing_url: String,
    pub detail_url: Option<String>,
    pub decided_at: DateTime<Utc>,
}

pub async fn list_exclusions(
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = list_exclusion_rows(&state.storage).await.map_err(internal_error)?;
    Ok(Json(rows))
}

pub async fn clear_exclusions(
    Extension(state): Extension<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state
        .storage
        .clear_exclusions()
        .await
        .map_err(internal_error)?;
    Ok(Json(json!({ "removed": removed })))
}

pub async fn list_exclusion_rows(storage: &PostgresStorage) -> anyhow::Result<Vec<ExclusionRow>> {
    let rows = storage.list_exclusions().await?;
    Ok(rows
        .into_iter()
        .map(|e| ExclusionRow {
            hash: e.hash,
            reason: e.reason.as_str().to_string(),
            title: e.title,
            site: e.site,
            listing_url: e.listing_url,
            detail_url: e.detail_url,
            decided_at: e.decided_at,
        })
        .collect())
}
