//! Lifecycle-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use convoy_core::domain::lifecycle::{LifecycleState, Session};
use convoy_core::dto::lifecycle::{
    ExtendGraceRequest, ExtendGraceResponse, HoldRequest, HoldResponse, OperationResult,
    RebuildRequest, RestartRequest, ShutdownRequest,
};

impl OrchestratorClient {
    // =============================================================================
    // Lifecycle Control
    // =============================================================================

    pub async fn lifecycle_status(&self) -> Result<LifecycleState> {
        let response = self
            .authorized(self.client.get(self.url("/lifecycle/status")))
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let response = self
            .authorized(self.client.get(self.url("/lifecycle/sessions")))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Keep the host alive for `duration_minutes`
    pub async fn hold(&self, req: HoldRequest) -> Result<HoldResponse> {
        let response = self
            .authorized(self.client.post(self.url("/lifecycle/hold")))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn release_hold(&self) -> Result<OperationResult> {
        let response = self
            .authorized(self.client.post(self.url("/lifecycle/release")))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Push a pending shutdown further out; `success` is false outside a grace period
    pub async fn extend_grace_period(&self, req: ExtendGraceRequest) -> Result<ExtendGraceResponse> {
        let response = self
            .authorized(self.client.post(self.url("/lifecycle/extend")))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn shutdown(&self, req: ShutdownRequest) -> Result<OperationResult> {
        let response = self
            .authorized(self.client.post(self.url("/lifecycle/shutdown")))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn restart(&self, req: RestartRequest) -> Result<OperationResult> {
        let response = self
            .authorized(self.client.post(self.url("/lifecycle/restart")))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn rebuild(&self, req: RebuildRequest) -> Result<OperationResult> {
        let response = self
            .authorized(self.client.post(self.url("/lifecycle/rebuild")))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }
}
