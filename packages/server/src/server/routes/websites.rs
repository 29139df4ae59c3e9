use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::{internal_error, not_found, ApiError};
use crate::server::app::AppState;
use rfp_crawler::Website;

#[derive(Deserialize)]
pub struct WebsitePayload {
    pub name: String,
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

pub async fn list_websites(
    Extension(state): Extension<AppState>,
) -> Result<Json<Vec<Website>>, ApiError> {
    let websites = state.storage.list_websites().await.map_err(internal_error)?;
    Ok(Json(websites))
}

pub async fn create_website(
    Extension(state): Extension<AppState>,
    Json(payload): Json<WebsitePayload>,
) -> Result<(StatusCode, Json<Website>), ApiError> {
    let website = state
        .storage
        .create_website(&payload.name, &payload.url, payload.enabled)
        .await
        .map_err(internal_error)?;
    Ok((StatusCode::CREATED, Json(website)))
}

pub async fn update_website(
    Extension(state): Extension<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<WebsitePayload>,
) -> Result<Json<Website>, ApiError> {
    let website = state
        .storage
        .update_website(id, &payload.name, &payload.url, payload.enabled)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Website"))?;
    Ok(Json(website))
}

pub async fn delete_website(
    Extension(state): Extension<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    let deleted = state
        .storage
        .delete_website(id)
        .await
        .map_err(internal_error)?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Website"))
    }
}
