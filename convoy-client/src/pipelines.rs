//! Pipeline-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use convoy_core::domain::pipeline::Pipeline;
use convoy_core::dto::pipeline::{PipelineSummary, StartPipeline, StartPipelineResponse};
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Pipeline Management
    // =============================================================================

    /// Start a new pipeline
    ///
    /// Returns as soon as the pipeline is accepted; planning and spawning
    /// continue on the orchestrator.
    pub async fn start_pipeline(&self, req: StartPipeline) -> Result<StartPipelineResponse> {
        let response = self
            .authorized(self.client.post(self.url("/pipelines")))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// List all pipelines, newest first
    pub async fn list_pipelines(&self) -> Result<Vec<PipelineSummary>> {
        let response = self
            .authorized(self.client.get(self.url("/pipelines")))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Get a pipeline by ID
    pub async fn get_pipeline(&self, pipeline_id: Uuid) -> Result<Pipeline> {
        let response = self
            .authorized(self.client.get(self.url(&format!("/pipelines/{}", pipeline_id))))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Cancel a pipeline, stopping its agents
    pub async fn cancel_pipeline(&self, pipeline_id: Uuid) -> Result<Pipeline> {
        let response = self
            .authorized(
                self.client
                    .post(self.url(&format!("/pipelines/{}/cancel", pipeline_id))),
            )
            .send()
            .await?;

        self.handle_response(response).await
    }
}
