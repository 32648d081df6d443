//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain. Agent callbacks
//! and `/health` are open; everything else sits behind `auth::require_token`.

pub mod agent;
pub mod auth;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod pipeline;
pub mod session;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::service::{LifecycleController, PipelineOrchestrator};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: PipelineOrchestrator,
    pub lifecycle: LifecycleController,
    /// `None` disables control API authentication
    pub api_token: Option<Arc<String>>,
}

impl AppState {
    pub fn new(
        orchestrator: PipelineOrchestrator,
        lifecycle: LifecycleController,
        api_token: Option<String>,
    ) -> Self {
        Self {
            orchestrator,
            lifecycle,
            api_token: api_token.filter(|t| !t.is_empty()).map(Arc::new),
        }
    }
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let control = Router::new()
        // Pipeline endpoints
        .route(
            "/pipelines",
            post(pipeline::start_pipeline).get(pipeline::list_pipelines),
        )
        .route("/pipelines/{id}", get(pipeline::get_pipeline))
        .route("/pipelines/{id}/cancel", post(pipeline::cancel_pipeline))
        // Lifecycle endpoints
        .route("/lifecycle/status", get(lifecycle::status))
        .route("/lifecycle/sessions", get(lifecycle::sessions))
        .route("/lifecycle/hold", post(lifecycle::hold))
        .route("/lifecycle/release", post(lifecycle::release))
        .route("/lifecycle/extend", post(lifecycle::extend))
        .route("/lifecycle/shutdown", post(lifecycle::shutdown))
        .route("/lifecycle/restart", post(lifecycle::restart))
        .route("/lifecycle/rebuild", post(lifecycle::rebuild))
        // Session endpoints
        .route("/sessions", post(session::register_session))
        .route("/sessions/{id}/touch", post(session::touch_session))
        .route("/sessions/{id}", delete(session::unregister_session))
        // Agent output
        .route("/agents/{agent_id}/output", get(agent::agent_output))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ));

    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Agent callbacks
        .route("/agent/status", post(agent::report_status))
        .route("/agent/complete", post(agent::report_complete))
        .route("/agent/fail", post(agent::report_fail))
        .merge(control)
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
