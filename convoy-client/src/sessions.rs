//! Session-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use convoy_core::domain::lifecycle::Session;
use convoy_core::dto::lifecycle::{OperationResult, RegisterSession};
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Sessions
    // =============================================================================

    /// Register an active session; the host will not go idle while it exists
    pub async fn register_session(&self, req: RegisterSession) -> Result<Session> {
        let response = self
            .authorized(self.client.post(self.url("/sessions")))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn touch_session(&self, session_id: Uuid) -> Result<OperationResult> {
        let response = self
            .authorized(
                self.client
                    .post(self.url(&format!("/sessions/{}/touch", session_id))),
            )
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn unregister_session(&self, session_id: Uuid) -> Result<()> {
        let response = self
            .authorized(self.client.delete(self.url(&format!("/sessions/{}", session_id))))
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}
