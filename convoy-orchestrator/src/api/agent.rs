//! Agent API Handlers
//!
//! Callback endpoints used by running agents, plus captured output.

use axum::{
    Json,
    extract::{Path, State},
};
use convoy_core::dto::agent::{
    AgentCompleteReport, AgentFailReport, AgentOutput, AgentStatusReport, CallbackAck,
    CallbackResult,
};

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

/// POST /agent/status
/// Heartbeat with optional progress; `success` is false for unknown agents
pub async fn report_status(
    State(state): State<AppState>,
    Json(report): Json<AgentStatusReport>,
) -> Json<CallbackAck> {
    tracing::debug!("Status from agent {}", report.agent_id);

    let success = state.orchestrator.heartbeat(report).await;
    Json(CallbackAck { success })
}

/// POST /agent/complete
pub async fn report_complete(
    State(state): State<AppState>,
    Json(report): Json<AgentCompleteReport>,
) -> Json<CallbackResult> {
    let outcome = state
        .orchestrator
        .complete(&report.agent_id, report.commit_hash, report.branch)
        .await;

    Json(CallbackResult {
        success: true,
        found: outcome.found(),
    })
}

/// POST /agent/fail
pub async fn report_fail(
    State(state): State<AppState>,
    Json(report): Json<AgentFailReport>,
) -> Json<CallbackResult> {
    let outcome = state.orchestrator.fail(&report.agent_id, report.error).await;

    Json(CallbackResult {
        success: true,
        found: outcome.found(),
    })
}

/// GET /agents/{agent_id}/output
pub async fn agent_output(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<AgentOutput>> {
    let lines = state
        .orchestrator
        .agent_output(&agent_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No output for agent {}", agent_id)))?;

    Ok(Json(AgentOutput { agent_id, lines }))
}
