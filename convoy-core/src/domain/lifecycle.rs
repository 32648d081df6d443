//! Host lifecycle domain model
//!
//! Describes whether the host running the orchestrator is busy, idling
//! towards shutdown, explicitly held alive, or going away.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state machine status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    /// Host is in use or still inside its minimum uptime
    Running,

    /// No work detected; shutdown is scheduled but can still be cancelled
    GracePeriod,

    /// Automatic shutdown is suspended until the hold expires
    Held,

    /// Terminal: the host is going away
    ShuttingDown,
}

impl std::fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleStatus::Running => write!(f, "running"),
            LifecycleStatus::GracePeriod => write!(f, "grace_period"),
            LifecycleStatus::Held => write!(f, "held"),
            LifecycleStatus::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

/// Why the host is shutting down
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShutdownReason {
    /// Grace period elapsed with no work
    Idle,
    /// Explicit shutdown request
    Requested { reason: String },
    /// Explicit restart request
    Restart { reason: String },
    /// Rebuild from a branch/commit
    Rebuild {
        branch: String,
        commit_sha: Option<String>,
        reason: String,
    },
    /// SIGINT / SIGTERM
    Signal { signal: String },
}

impl ShutdownReason {
    /// Process exit code the supervising host uses to tell the cases apart
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownReason::Restart { .. } => 75,
            ShutdownReason::Rebuild { .. } => 76,
            _ => 0,
        }
    }
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::Idle => write!(f, "idle: grace period elapsed"),
            ShutdownReason::Requested { reason } => write!(f, "shutdown requested: {}", reason),
            ShutdownReason::Restart { reason } => write!(f, "restart requested: {}", reason),
            ShutdownReason::Rebuild { branch, reason, .. } => {
                write!(f, "rebuild from {} requested: {}", branch, reason)
            }
            ShutdownReason::Signal { signal } => write!(f, "received {}", signal),
        }
    }
}

/// Point-in-time view of the lifecycle controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleState {
    pub status: LifecycleStatus,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub hold_until: Option<DateTime<Utc>>,
    pub hold_reason: Option<String>,
    pub grace_period_start: Option<DateTime<Utc>>,
    /// Seconds left before a scheduled shutdown, when in grace period
    pub grace_remaining_secs: Option<u64>,
    pub shutdown_reason: Option<ShutdownReason>,
    pub active_sessions: usize,
    pub uptime_secs: u64,
}

/// An ephemeral terminal/work unit that keeps the host alive
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(agent_id: Option<String>, task_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            agent_id,
            task_id,
            created_at: now,
            last_activity: now,
        }
    }
}
