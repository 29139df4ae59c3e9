//! Application state and router assembly.

use std::sync::Arc;

use axum::extract::Extension;
use axum::routing::{get, post, put};
use axum::Router;
use chrono::FixedOffset;
use rfp_crawler::{BedrockClient, CrawlerConfig, HttpFetcher, PostgresStorage};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::notifier::Mailer;
use crate::server::routes::{email, health, rfps, schedule, scrape, websites};

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<PostgresStorage>,
    pub fetcher: Arc<HttpFetcher>,
    pub llm: Arc<BedrockClient>,
    pub crawler_config: Arc<CrawlerConfig>,
    pub mailer: Arc<dyn Mailer>,
    pub schedule_offset: FixedOffset,
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/rfps", get(rfps::list_rfps))
        .route("/rfps/:hash", get(rfps::get_rfp).delete(rfps::delete_rfp))
        .route("/rfps/:hash/pdf", get(rfps::get_rfp_pdf))
        .route(
            "/exclusions",
            get(rfps::list_exclusions).delete(rfps::clear_exclusions),
        )
        .route(
            "/schedule",
            get(schedule::get_schedule)
                .put(schedule::put_schedule)
                .delete(schedule::delete_schedule),
        )
        .route(
            "/email-settings",
            get(email::get_email_settings).put(email::put_email_settings),
        )
        .route(
            "/website-settings",
            get(websites::list_websites).post(websites::create_website),
        )
        .route(
            "/website-settings/:id",
            put(websites::update_website).delete(websites::delete_website),
        )
        .route("/scrape", post(scrape::trigger_scrape))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
