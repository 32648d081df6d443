//! Control API authentication
//!
//! When an API token is configured every control request must carry it in
//! `X-API-Key` or `Authorization: Bearer <token>`. Without a token all
//! requests pass (development mode). Agent callbacks and `/health` are
//! mounted outside this layer.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::api::AppState;
use crate::api::error::ApiError;

fn provided_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
}

pub async fn require_token(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.api_token.as_deref() else {
        return next.run(req).await;
    };

    let authorized = provided_token(req.headers())
        .is_some_and(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())));

    if authorized {
        next.run(req).await
    } else {
        tracing::debug!("Rejected unauthenticated request to {}", req.uri().path());
        ApiError::Unauthorized.into_response()
    }
}
