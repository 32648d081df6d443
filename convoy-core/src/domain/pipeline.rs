//! Pipeline domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A goal-driven unit of work against one repository
///
/// Owned by the orchestrator, which persists a snapshot of it on every
/// phase or task transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub id: Uuid,
    pub repo_url: String,
    pub goal: String,
    pub provider: String,
    pub model: Option<String>,
    pub agent_type: Option<String>,
    pub max_agents: usize,
    pub spawn_mode: SpawnMode,
    pub tasks: Vec<Task>,
    pub phase: PipelinePhase,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Pipeline {
    /// Short form of the id used in branch names and agent ids
    pub fn short_id(&self) -> String {
        short_id(self.id)
    }

    /// Whether every task has reached a terminal status
    pub fn all_tasks_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    pub fn count_tasks(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }
}

/// First eight characters of a pipeline id
pub fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

/// Pipeline phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Planning,
    Spawning,
    Executing,
    Completed,
    Failed,
}

impl PipelinePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelinePhase::Completed | PipelinePhase::Failed)
    }
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelinePhase::Planning => write!(f, "planning"),
            PipelinePhase::Spawning => write!(f, "spawning"),
            PipelinePhase::Executing => write!(f, "executing"),
            PipelinePhase::Completed => write!(f, "completed"),
            PipelinePhase::Failed => write!(f, "failed"),
        }
    }
}

/// Which spawn backend provisions the agents of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnMode {
    Local,
    Remote,
}

impl std::fmt::Display for SpawnMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpawnMode::Local => write!(f, "local"),
            SpawnMode::Remote => write!(f, "remote"),
        }
    }
}

impl std::str::FromStr for SpawnMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(SpawnMode::Local),
            "remote" => Ok(SpawnMode::Remote),
            other => Err(format!("unknown spawn mode '{}'", other)),
        }
    }
}

/// One decomposed unit of agent work
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique within the pipeline (`task-1`, `task-2`, ...)
    pub id: String,
    pub title: String,
    pub description: String,
    pub agent_id: Option<String>,
    pub status: TaskStatus,
    pub branch: String,
    pub commit_ref: Option<String>,
    pub error: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Free-form progress reported by the agent
    pub progress: Option<serde_json::Value>,
    pub message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(index: usize, title: String, description: String, branch: String) -> Self {
        Self {
            id: format!("task-{}", index),
            title,
            description,
            agent_id: None,
            status: TaskStatus::Pending,
            branch,
            commit_ref: None,
            error: None,
            last_heartbeat: None,
            progress: None,
            message: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Moves the task to `next` if the transition is monotonic
    ///
    /// Returns false (and leaves the task untouched) for a terminal task or
    /// a backwards transition.
    pub fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        if next == TaskStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        true
    }
}

/// Task execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::Running) => true,
            (TaskStatus::Pending | TaskStatus::Running, n) => n.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(1, "t".into(), "d".into(), "convoy/abc/task-1".into())
    }

    #[test]
    fn test_task_transitions_are_monotonic() {
        let mut t = task();
        assert!(t.transition(TaskStatus::Running));
        assert!(t.started_at.is_some());
        assert!(!t.transition(TaskStatus::Pending));
        assert!(t.transition(TaskStatus::Completed));
        assert!(t.completed_at.is_some());
        assert!(!t.transition(TaskStatus::Running));
        assert!(!t.transition(TaskStatus::Failed));
        assert_eq!(t.status, TaskStatus::Completed);
    }

    #[test]
    fn test_pending_task_can_fail_directly() {
        let mut t = task();
        assert!(t.transition(TaskStatus::Failed));
        assert_eq!(t.status, TaskStatus::Failed);
    }

    #[test]
    fn test_spawn_mode_parsing() {
        assert_eq!("Remote".parse::<SpawnMode>(), Ok(SpawnMode::Remote));
        assert_eq!(" local ".parse::<SpawnMode>(), Ok(SpawnMode::Local));
        assert!("docker".parse::<SpawnMode>().is_err());
    }

    #[test]
    fn test_phase_serializes_snake_case() {
        let json = serde_json::to_string(&PipelinePhase::Executing).unwrap();
        assert_eq!(json, "\"executing\"");
    }
}
