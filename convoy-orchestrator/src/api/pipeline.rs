//! Pipeline API Handlers
//!
//! HTTP endpoints for pipeline management.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use convoy_core::domain::pipeline::Pipeline;
use convoy_core::dto::pipeline::{PipelineSummary, StartPipeline, StartPipelineResponse};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

/// POST /pipelines
/// Accept a pipeline; planning and spawning continue in the background
pub async fn start_pipeline(
    State(state): State<AppState>,
    Json(req): Json<StartPipeline>,
) -> ApiResult<(StatusCode, Json<StartPipelineResponse>)> {
    tracing::info!("Starting pipeline for {}: {}", req.repo_url, req.goal);

    let response = state.orchestrator.start(req).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /pipelines
pub async fn list_pipelines(State(state): State<AppState>) -> Json<Vec<PipelineSummary>> {
    Json(state.orchestrator.list().await)
}

/// GET /pipelines/{id}
pub async fn get_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Pipeline>> {
    tracing::debug!("Getting pipeline: {}", id);

    let pipeline = state
        .orchestrator
        .get(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Pipeline {} not found", id)))?;

    Ok(Json(pipeline))
}

/// POST /pipelines/{id}/cancel
pub async fn cancel_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Pipeline>> {
    tracing::info!("Cancelling pipeline: {}", id);

    Ok(Json(state.orchestrator.cancel(id).await?))
}
