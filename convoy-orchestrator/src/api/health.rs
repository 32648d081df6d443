//! Health Check API Handler
//!
//! Health check endpoint for monitoring; never authenticated.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;

use crate::api::AppState;

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let lifecycle = state.lifecycle.status().await;

    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "lifecycle": lifecycle.status,
            "uptimeSecs": lifecycle.uptime_secs,
            "activePipelines": state.orchestrator.active_pipelines().await,
        })),
    )
}
