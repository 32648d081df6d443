//! Pipeline DTOs for the control API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::{Pipeline, PipelinePhase, SpawnMode, TaskStatus};

/// Request to start a new pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPipeline {
    pub repo_url: String,
    pub goal: String,
    /// Model provider the agents should use (e.g. "anthropic")
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Forwarded to agents as GITHUB_TOKEN; never persisted
    #[serde(default)]
    pub github_token: Option<String>,
    #[serde(default)]
    pub max_agents: Option<usize>,
    #[serde(default)]
    pub agent_type: Option<String>,
    /// Overrides the orchestrator's default spawn backend
    #[serde(default)]
    pub spawn_mode: Option<SpawnMode>,
}

/// Immediate answer to a start request; execution continues asynchronously
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPipelineResponse {
    pub pipeline_id: Uuid,
    pub phase: PipelinePhase,
}

/// Summary information about a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSummary {
    pub id: Uuid,
    pub repo_url: String,
    pub goal: String,
    pub phase: PipelinePhase,
    pub task_count: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl From<&Pipeline> for PipelineSummary {
    fn from(pipeline: &Pipeline) -> Self {
        PipelineSummary {
            id: pipeline.id,
            repo_url: pipeline.repo_url.clone(),
            goal: pipeline.goal.clone(),
            phase: pipeline.phase,
            task_count: pipeline.tasks.len(),
            completed_tasks: pipeline.count_tasks(TaskStatus::Completed),
            failed_tasks: pipeline.count_tasks(TaskStatus::Failed),
            started_at: pipeline.started_at,
            completed_at: pipeline.completed_at,
            error: pipeline.error.clone(),
        }
    }
}
