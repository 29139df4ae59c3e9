use axum::extract::Extension;
use axum::Json;

use super::{internal_error, ApiError};
use crate::server::app::AppState;
use rfp_crawler::EmailSettings;

pub async fn get_email_settings(
    Extension(state): Extension<AppState>,
) -> Result<Json<EmailSettings>, ApiError> {
    let settings = state
        .storage
        .get_or_create_email_settings()
        .await
        .map_err(internal_error)?;
    Ok(Json(settings))
}

pub async fn put_email_settings(
    Extension(state): Extension<AppState>,
    Json(payload): Json<EmailSettings>,
) -> Result<Json<EmailSettings>, ApiError> {
    let settings = state
        .storage
        .update_email_settings(&payload)
        .await
        .map_err(internal_error)?;
    Ok(Json(settings))
}
