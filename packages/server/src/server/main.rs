// Entry point: admin API + scheduler by default, or one-shot maintenance
// commands via flags.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rfp_crawler::{BedrockClient, CrawlerConfig, HttpFetcher, PostgresStorage};
use server_core::config::Config;
use server_core::notifier::LogMailer;
use server_core::scheduler::{execute_run, run_scheduler};
use server_core::server::app::{build_app, AppState};
use server_core::server::routes::rfps::list_exclusion_rows;

#[derive(Parser)]
#[command(name = "server", about = "LLM-driven RFP discovery pipeline")]
struct Args {
    /// Run one scrape now and send the main digest
    #[arg(long)]
    email: bool,
    /// Run one scrape now and send the debug digest
    #[arg(long)]
    debug_email: bool,
    /// Print processed RFPs and exit
    #[arg(long)]
    list: bool,
    /// Delete all processed RFPs and exit
    #[arg(long)]
    clear: bool,
    /// Print exclusions and exit
    #[arg(long)]
    list_exclusions: bool,
    /// Delete all exclusions and exit
    #[arg(long)]
    clear_exclusions: bool,
    /// Reset the scheduler state and exit
    #[arg(long)]
    clear_schedule: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,rfp_crawler=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    let storage = Arc::new(PostgresStorage::new(pool));

    if args.list {
        for row in storage.list_processed().await? {
            println!("{}  {}  {}  [{}]", row.hash, row.title, row.url, row.site);
        }
        return Ok(());
    }
    if args.clear {
        let removed = storage.clear_processed().await?;
        println!("Removed {removed} processed RFP(s)");
        return Ok(());
    }
    if args.list_exclusions {
        for row in list_exclusion_rows(&storage).await? {
            println!("{}  {}  {}  [{}]", row.hash, row.reason, row.title, row.site);
        }
        return Ok(());
    }
    if args.clear_exclusions {
        let removed = storage.clear_exclusions().await?;
        println!("Removed {removed} exclusion(s)");
        return Ok(());
    }
    if args.clear_schedule {
        storage.reset_scrape_config().await?;
        println!("Schedule reset");
        return Ok(());
    }

    let crawler_config = CrawlerConfig::from_env().context("Failed to load crawler config")?;
    let state = AppState {
        storage,
        fetcher: Arc::new(HttpFetcher::new()?),
        llm: Arc::new(BedrockClient::new(&crawler_config)?),
        crawler_config: Arc::new(crawler_config),
        mailer: Arc::new(LogMailer),
        schedule_offset: config.schedule_offset,
    };

    if args.email || args.debug_email {
        let report = execute_run(&state, args.email, args.debug_email).await?;
        state.storage.mark_run_finished(chrono::Utc::now()).await?;
        if report.new_rfps.is_empty() {
            println!("No new items detected.");
        } else {
            println!("Inserted new items:");
            for rfp in &report.new_rfps {
                println!("- {} ({}) [detail: {}]", rfp.title, rfp.url, rfp.has_detail);
            }
        }
        return Ok(());
    }

    let app = build_app(state.clone());
    tokio::spawn(run_scheduler(state));

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
