//! Session API Handlers

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use convoy_core::domain::lifecycle::Session;
use convoy_core::dto::lifecycle::{OperationResult, RegisterSession};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

/// POST /sessions
pub async fn register_session(
    State(state): State<AppState>,
    Json(req): Json<RegisterSession>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    let session = state
        .lifecycle
        .register_session(req.agent_id, req.task_id)
        .await?;

    Ok((StatusCode::CREATED, Json(session)))
}

/// POST /sessions/{id}/touch
pub async fn touch_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<OperationResult>> {
    state.lifecycle.touch_session(id).await?;
    Ok(Json(OperationResult::ok()))
}

/// DELETE /sessions/{id}
pub async fn unregister_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if state.lifecycle.unregister_session(id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Session {} not found", id)))
    }
}
