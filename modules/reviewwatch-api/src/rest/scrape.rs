use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};

use crate::AppState;

/// Ask for a scrape run. 202 when a run was started, 200 with
/// `already_running` when one is in progress; overlap is not an error.
pub async fn scrape_start(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let outcome = state.orchestrator.start_run().await;
    if outcome.accepted {
        (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "run_id": outcome.run_id })),
        )
    } else {
        (
            StatusCode::OK,
            Json(serde_json::json!({ "run_id": outcome.run_id, "already_running": true })),
        )
    }
}

pub async fn scrape_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.get_status())
}
