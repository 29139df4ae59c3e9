pub mod email;
pub mod health;
pub mod rfps;
pub mod schedule;
pub mod scrape;
pub mod websites;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

pub fn internal_error(e: anyhow::Error) -> ApiError {
    tracing::error!(error = %format!("{e:#}"), "Request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: format!("{e:#}"),
        }),
    )
}

pub fn not_found(what: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: format!("{what} not found"),
        }),
    )
}
