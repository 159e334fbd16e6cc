use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use browserless_client::BrowserlessClient;
use reviewwatch_common::{Config, FileLocationSource, LocationSource};
use reviewwatch_scraper::maps::BrowserlessReviewFetcher;
use reviewwatch_scraper::run_log::RunLog;
use reviewwatch_scraper::scheduler::spawn_scrape_interval;
use reviewwatch_scraper::{Orchestrator, RunPolicy, SnapshotStore};

mod rest;

pub struct AppState {
    pub orchestrator: Orchestrator,
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/", get(|| async { "ok" }))
        // Scrape control
        .route("/scrape/start", post(rest::scrape::scrape_start))
        .route("/scrape/status", get(rest::scrape::scrape_status))
        // Data
        .route("/snapshots", get(rest::api_snapshots))
        .route("/api/locations", get(rest::api_locations))
        .route("/api/stats", get(rest::api_stats))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        // Status and snapshots change under a running scrape
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                }),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("reviewwatch=info".parse()?))
        .init();

    let config = Config::from_env()?;
    config.log_redacted();

    let store = Arc::new(SnapshotStore::open(config.snapshots_path())?);
    info!(locations = store.get_all().len(), "Snapshot store loaded");

    let client = BrowserlessClient::with_timeout(
        &config.browserless_url,
        config.browserless_token.as_deref(),
        Duration::from_secs(config.fetch_timeout_secs),
    )?;
    let fetcher = Arc::new(BrowserlessReviewFetcher::new(client));

    let locations = Arc::new(FileLocationSource::new(config.locations_path.clone()));
    match locations.load().await {
        Ok(list) => info!(
            path = %locations.path().display(),
            count = list.len(),
            "Location configuration readable"
        ),
        Err(e) => warn!(
            path = %locations.path().display(),
            error = %e,
            "Location configuration unreadable; runs will fail until fixed"
        ),
    }

    let orchestrator = Orchestrator::new(
        store,
        fetcher,
        locations,
        RunPolicy::from_config(&config),
        Some(RunLog::new(config.run_log_dir())),
    );

    if config.schedule_enabled {
        spawn_scrape_interval(orchestrator.clone(), config.scrape_interval());
    } else {
        info!("Scrape schedule disabled (SCRAPE_SCHEDULE_ENABLED=false)");
    }

    let app = build_router(Arc::new(AppState { orchestrator }));

    let addr = format!("{}:{}", config.web_host, config.web_port);
    info!("ReviewWatch API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
