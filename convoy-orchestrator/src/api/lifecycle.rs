//! Lifecycle API Handlers
//!
//! Inspect and steer the host lifecycle: holds, grace period, shutdown.

use axum::{Json, extract::State};
use convoy_core::domain::lifecycle::{LifecycleState, Session, ShutdownReason};
use convoy_core::dto::lifecycle::{
    ExtendGraceRequest, ExtendGraceResponse, HoldRequest, HoldResponse, OperationResult,
    RebuildRequest, RestartRequest, ShutdownRequest,
};
use std::time::Duration;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

const DEFAULT_REASON: &str = "requested via API";

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(60))
}

/// GET /lifecycle/status
pub async fn status(State(state): State<AppState>) -> Json<LifecycleState> {
    Json(state.lifecycle.status().await)
}

/// GET /lifecycle/sessions
pub async fn sessions(State(state): State<AppState>) -> Json<Vec<Session>> {
    Json(state.lifecycle.sessions().await)
}

/// POST /lifecycle/hold
pub async fn hold(
    State(state): State<AppState>,
    Json(req): Json<HoldRequest>,
) -> ApiResult<Json<HoldResponse>> {
    if req.duration_minutes == 0 {
        return Err(ApiError::BadRequest(
            "durationMinutes must be at least 1".to_string(),
        ));
    }

    let reason = req.reason.unwrap_or_else(|| DEFAULT_REASON.to_string());
    let hold_until = state
        .lifecycle
        .hold(minutes(req.duration_minutes), reason)
        .await?;

    Ok(Json(HoldResponse {
        success: true,
        hold_until,
    }))
}

/// POST /lifecycle/release
pub async fn release(State(state): State<AppState>) -> Json<OperationResult> {
    if state.lifecycle.release_hold().await {
        Json(OperationResult::ok())
    } else {
        Json(OperationResult::rejected("Not held"))
    }
}

/// POST /lifecycle/extend
/// Outside a grace period this answers `success: false` rather than an error status
pub async fn extend(
    State(state): State<AppState>,
    Json(req): Json<ExtendGraceRequest>,
) -> Json<ExtendGraceResponse> {
    match state
        .lifecycle
        .extend_grace_period(minutes(req.additional_minutes))
        .await
    {
        Ok(remaining) => Json(ExtendGraceResponse {
            success: true,
            remaining_secs: Some(remaining.as_secs()),
            reason: None,
        }),
        Err(e) => Json(ExtendGraceResponse {
            success: false,
            remaining_secs: None,
            reason: Some(e.to_string()),
        }),
    }
}

/// POST /lifecycle/shutdown
pub async fn shutdown(
    State(state): State<AppState>,
    Json(req): Json<ShutdownRequest>,
) -> Json<OperationResult> {
    let reason = req.reason.unwrap_or_else(|| DEFAULT_REASON.to_string());
    tracing::info!("Shutdown requested (force: {}): {}", req.force, reason);

    if req.force {
        if state
            .lifecycle
            .force_shutdown(ShutdownReason::Requested { reason })
            .await
        {
            return Json(OperationResult::ok());
        }
        return Json(OperationResult::rejected("Already shutting down"));
    }

    match state.lifecycle.request_shutdown(reason).await {
        Ok(()) => Json(OperationResult::ok()),
        Err(e) => Json(OperationResult::rejected(e.to_string())),
    }
}

/// POST /lifecycle/restart
pub async fn restart(
    State(state): State<AppState>,
    Json(req): Json<RestartRequest>,
) -> Json<OperationResult> {
    let reason = req.reason.unwrap_or_else(|| DEFAULT_REASON.to_string());
    tracing::info!("Restart requested: {}", reason);

    if state.lifecycle.restart(reason).await {
        Json(OperationResult::ok())
    } else {
        Json(OperationResult::rejected("Already shutting down"))
    }
}

/// POST /lifecycle/rebuild
pub async fn rebuild(
    State(state): State<AppState>,
    Json(req): Json<RebuildRequest>,
) -> ApiResult<Json<OperationResult>> {
    if req.branch.trim().is_empty() {
        return Err(ApiError::BadRequest("branch cannot be empty".to_string()));
    }

    let reason = req.reason.unwrap_or_else(|| DEFAULT_REASON.to_string());
    tracing::info!("Rebuild from {} requested: {}", req.branch, reason);

    if state
        .lifecycle
        .rebuild(req.branch, req.commit_sha, reason)
        .await?
    {
        Ok(Json(OperationResult::ok()))
    } else {
        Ok(Json(OperationResult::rejected("Already shutting down")))
    }
}
