pub mod scrape;

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use tracing::warn;

use reviewwatch_common::LocationSource;
use reviewwatch_scraper::stats::dashboard_stats;
use reviewwatch_scraper::store::SnapshotMap;

use crate::AppState;

/// Every location's last good snapshot, keyed by location id.
pub async fn api_snapshots(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshots = state.orchestrator.store().get_all();
    Json(SnapshotMap::clone(&snapshots))
}

pub async fn api_locations(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.orchestrator.locations().load().await {
        Ok(locations) => Json(serde_json::json!({ "locations": locations })).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to load locations");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// Dashboard aggregate. An unreadable location file yields empty stats rather
/// than an error so the dashboard keeps rendering.
pub async fn api_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let locations = state
        .orchestrator
        .locations()
        .load()
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load locations for stats");
            Vec::new()
        });
    let snapshots = state.orchestrator.store().get_all();
    Json(dashboard_stats(&locations, &snapshots))
}
