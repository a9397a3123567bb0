mod api;
mod config;
mod db;
mod error;
mod event_refresh;
mod feedback;
mod fetcher;
mod forecast;
mod state;
mod types;

use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::db::SqliteFeedbackStore;
use crate::error::Result;
use crate::event_refresh::{EventRefreshOrchestrator, EventRefresher, RefreshSettings};
use crate::feedback::{FeedbackLedger, UniformTrust};
use crate::fetcher::{HttpMarketClient, UpstreamEventSource};
use crate::forecast::HttpPredictor;
use crate::state::EventStore;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect(&format!("sqlite:{}?mode=rwc", cfg.db_path))
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Feedback ledger ---
    let store = Arc::new(SqliteFeedbackStore::new(pool.clone()));
    let ledger = Arc::new(FeedbackLedger::load(store, cfg.blend.decay_rate).await?);

    // --- Upstream + predictor ---
    let client = Arc::new(HttpMarketClient::new(&cfg.upstream_api_url)?);
    let source = UpstreamEventSource::new(client, cfg.upstream_page_size, cfg.upstream_max_pages);
    let predictor = Arc::new(HttpPredictor::new(&cfg.predictor_url, cfg.extremize)?);

    info!(
        "Blend preset={} use_feedback={} weight={:.2} min_count={} upstream={} predictor={}",
        cfg.feedback_preset,
        cfg.blend.use_feedback,
        cfg.blend.feedback_weight,
        cfg.blend.min_feedback_count,
        cfg.upstream_api_url,
        cfg.predictor_url,
    );

    let orchestrator = Arc::new(EventRefreshOrchestrator::new(
        source,
        EventStore::new(),
        predictor,
        ledger,
        cfg.blend.clone(),
        Arc::new(UniformTrust),
        RefreshSettings {
            lookback_days: cfg.event_lookback_days,
            max_concurrent_forecasts: cfg.max_concurrent_forecasts,
            publish_predictions: cfg.publish_predictions,
        },
    ));

    // --- Bootstrap refresh ---
    let report = orchestrator.refresh().await;
    info!(
        "Bootstrap complete: {} events served ({:?}), {} published",
        orchestrator.event_count(),
        report.origin,
        report.published,
    );
    if !report.forecast_errors.is_empty() {
        warn!("{} events kept their previous probability after predictor failures", report.forecast_errors.len());
    }

    // Event refresher (background, every REFRESH_INTERVAL_SECS)
    let refresher = EventRefresher::new(Arc::clone(&orchestrator), cfg.refresh_interval_secs);
    tokio::spawn(async move { refresher.run().await });

    // HTTP API server
    let app = router(ApiState { orchestrator });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
