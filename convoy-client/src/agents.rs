//! Agent callback endpoints
//!
//! These routes are unauthenticated; agents identify themselves by agent id.

use crate::OrchestratorClient;
use crate::error::Result;
use convoy_core::dto::agent::{
    AgentCompleteReport, AgentFailReport, AgentOutput, AgentStatusReport, CallbackAck,
    CallbackResult,
};

impl OrchestratorClient {
    // =============================================================================
    // Agent Callbacks
    // =============================================================================

    pub async fn report_status(&self, report: &AgentStatusReport) -> Result<CallbackAck> {
        let response = self
            .client
            .post(self.url("/agent/status"))
            .json(report)
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn report_complete(&self, report: &AgentCompleteReport) -> Result<CallbackResult> {
        let response = self
            .client
            .post(self.url("/agent/complete"))
            .json(report)
            .send()
            .await?;

        self.handle_response(response).await
    }

    pub async fn report_fail(&self, report: &AgentFailReport) -> Result<CallbackResult> {
        let response = self
            .client
            .post(self.url("/agent/fail"))
            .json(report)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Captured output of a locally spawned agent
    pub async fn agent_output(&self, agent_id: &str) -> Result<AgentOutput> {
        let response = self
            .authorized(
                self.client
                    .get(self.url(&format!("/agents/{}/output", agent_id))),
            )
            .send()
            .await?;

        self.handle_response(response).await
    }
}
