//! Agent callback DTOs
//!
//! Bodies posted by running agents to `/agent/status`, `/agent/complete`
//! and `/agent/fail`.

use serde::{Deserialize, Serialize};

/// Heartbeat / progress report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatusReport {
    pub agent_id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub progress: Option<serde_json::Value>,
}

/// Successful completion report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCompleteReport {
    pub agent_id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

/// Failure report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentFailReport {
    pub agent_id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    pub error: String,
}

/// Answer to a heartbeat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackAck {
    pub success: bool,
}

/// Answer to a complete/fail report
///
/// `found` is false for an unknown agent or an already-terminal task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackResult {
    pub success: bool,
    pub found: bool,
}

/// Captured output of a locally spawned agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutput {
    pub agent_id: String,
    pub lines: Vec<String>,
}
