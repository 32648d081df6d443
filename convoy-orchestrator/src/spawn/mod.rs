//! Spawn providers
//!
//! A spawn provider starts a worker that executes one task end-to-end and
//! calls back, and guarantees it can be torn down again. Two variants exist:
//! - `remote`: an isolated instance created through a machines REST API
//! - `local`: a supervised child process on this host
//!
//! Both inject the same environment, which is the only configuration
//! channel a worker gets.

pub mod local;
pub mod naming;
pub mod remote;
pub mod script;

use async_trait::async_trait;
use convoy_core::domain::pipeline::SpawnMode;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub use local::LocalSpawnProvider;
pub use remote::{RemoteConfig, RemoteSpawnProvider};
pub use script::{BashScriptBuilder, TaskScriptBuilder};

#[derive(Debug, Error)]
pub enum SpawnError {
    /// No credentials, API token or runtime for this provider
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provisioning call itself failed
    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    /// The worker never reported ready within the bound
    #[error("provision timeout: {instance} not ready after {}s", .timeout.as_secs())]
    ProvisionTimeout { instance: String, timeout: Duration },
}

/// Everything a provider needs to start one agent
#[derive(Debug, Clone)]
pub struct AgentLaunch {
    pub agent_id: String,
    pub pipeline_id: Uuid,
    pub task_id: String,
    pub task_title: String,
    pub task_description: String,
    pub branch: String,
    pub repo_url: String,
    pub goal: String,
    pub provider: String,
    pub model: Option<String>,
    pub agent_type: Option<String>,
    pub github_token: Option<String>,
    pub callback_url: String,
    /// Opaque script produced by a `TaskScriptBuilder`
    pub script: String,
}

impl AgentLaunch {
    /// Environment injected into the worker
    pub fn env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("CONVOY_AGENT_ID".to_string(), self.agent_id.clone()),
            ("CONVOY_PIPELINE_ID".to_string(), self.pipeline_id.to_string()),
            ("CONVOY_TASK_ID".to_string(), self.task_id.clone()),
            ("CONVOY_TASK_TITLE".to_string(), self.task_title.clone()),
            (
                "CONVOY_TASK_DESCRIPTION".to_string(),
                self.task_description.clone(),
            ),
            ("CONVOY_GOAL".to_string(), self.goal.clone()),
            ("CONVOY_REPO_URL".to_string(), self.repo_url.clone()),
            ("CONVOY_BRANCH".to_string(), self.branch.clone()),
            ("CONVOY_CALLBACK_URL".to_string(), self.callback_url.clone()),
            ("CONVOY_PROVIDER".to_string(), self.provider.clone()),
            ("CONVOY_TASK_SCRIPT".to_string(), self.script.clone()),
        ];

        if let Some(model) = &self.model {
            env.push(("CONVOY_MODEL".to_string(), model.clone()));
        }
        if let Some(agent_type) = &self.agent_type {
            env.push(("CONVOY_AGENT_TYPE".to_string(), agent_type.clone()));
        }
        if let Some(token) = &self.github_token {
            env.push(("GITHUB_TOKEN".to_string(), token.clone()));
        }

        env
    }
}

/// Provider-specific handle to a started worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentHandle {
    Local { pid: Option<u32> },
    Remote { app: String, machine_id: String },
}

#[derive(Debug, Clone)]
pub struct SpawnedAgent {
    pub agent_id: String,
    pub handle: AgentHandle,
}

/// Exit report of a locally supervised agent process
///
/// `code` is `None` when the process was killed by a signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentExit {
    pub agent_id: String,
    pub code: Option<i32>,
}

#[async_trait]
pub trait SpawnProvider: Send + Sync {
    fn kind(&self) -> SpawnMode;

    /// Fresh agent id, unique within this provider's namespace
    fn next_agent_id(&self, pipeline_id: Uuid, task_index: usize) -> String {
        naming::agent_id(pipeline_id, task_index)
    }

    async fn spawn(&self, launch: AgentLaunch) -> Result<SpawnedAgent, SpawnError>;

    async fn is_alive(&self, agent_id: &str) -> bool;

    /// Tears the worker down; a no-op for unknown or already-gone agents
    async fn stop(&self, agent_id: &str);

    /// Captured output, for providers that stream it
    async fn output(&self, _agent_id: &str) -> Option<Vec<String>> {
        None
    }
}
