//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::service::{LifecycleError, OrchestratorError};

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unauthorized,
    ServiceUnavailable(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Validation(msg) => ApiError::BadRequest(msg),
            OrchestratorError::NotFound(id) => {
                ApiError::NotFound(format!("Pipeline {} not found", id))
            }
            OrchestratorError::ShuttingDown => {
                ApiError::ServiceUnavailable("Host is shutting down".to_string())
            }
            OrchestratorError::Store(e) => ApiError::InternalError(e.to_string()),
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotInGracePeriod => {
                ApiError::Conflict("Not in grace period".to_string())
            }
            LifecycleError::ShuttingDown => {
                ApiError::ServiceUnavailable("Host is shutting down".to_string())
            }
            LifecycleError::SessionNotFound(id) => {
                ApiError::NotFound(format!("Session {} not found", id))
            }
            LifecycleError::Io(msg) => ApiError::InternalError(msg),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
