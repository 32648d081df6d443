//! Pipeline Repository
//!
//! Persists one JSON snapshot per pipeline under the pipelines directory.
//! Snapshots are rewritten on every phase or task transition and exist for
//! crash forensics and external inspection; they are never loaded back into
//! the orchestrator automatically.

use async_trait::async_trait;
use convoy_core::domain::pipeline::{Pipeline, TaskStatus};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::service::lifecycle::WorkCounter;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Directory of pipeline snapshots
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the snapshot directory if needed
    pub async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Writes a snapshot, replacing the previous one atomically
    pub async fn save(&self, pipeline: &Pipeline) -> Result<()> {
        let body = serde_json::to_vec_pretty(pipeline)?;
        let target = self.path_for(pipeline.id);
        let tmp = self.dir.join(format!(".{}.json.tmp", pipeline.id));

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &target).await?;

        debug!(
            "Saved snapshot for pipeline {} (phase {})",
            pipeline.id, pipeline.phase
        );
        Ok(())
    }

    pub async fn load(&self, id: Uuid) -> Result<Option<Pipeline>> {
        match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Loads every readable snapshot; unparseable files are skipped
    pub async fn load_all(&self) -> Result<Vec<Pipeline>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut pipelines = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Failed to read snapshot {}: {}", path.display(), e);
                    continue;
                }
            };

            match serde_json::from_slice::<Pipeline>(&bytes) {
                Ok(pipeline) => pipelines.push(pipeline),
                Err(e) => warn!("Skipping unparseable snapshot {}: {}", path.display(), e),
            }
        }

        Ok(pipelines)
    }

    /// Pending or running tasks across pipelines that have not finished
    pub async fn incomplete_task_count(&self) -> Result<usize> {
        let count = self
            .load_all()
            .await?
            .iter()
            .filter(|p| !p.phase.is_terminal())
            .flat_map(|p| p.tasks.iter())
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Running))
            .count();

        Ok(count)
    }
}

#[async_trait]
impl WorkCounter for SnapshotStore {
    async fn incomplete_work(&self) -> anyhow::Result<usize> {
        Ok(self.incomplete_task_count().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use convoy_core::domain::pipeline::{PipelinePhase, SpawnMode, Task};

    fn pipeline(phase: PipelinePhase, statuses: &[TaskStatus]) -> Pipeline {
        let tasks = statuses
            .iter()
            .enumerate()
            .map(|(i, status)| {
                let mut task = Task::new(i + 1, "t".into(), "d".into(), format!("b-{}", i));
                task.status = *status;
                task
            })
            .collect();

        Pipeline {
            id: Uuid::new_v4(),
            repo_url: "https://github.com/acme/widgets".into(),
            goal: "fix bugs".into(),
            provider: "anthropic".into(),
            model: None,
            agent_type: None,
            max_agents: 2,
            spawn_mode: SpawnMode::Local,
            tasks,
            phase,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("pipelines"));
        store.init().await.unwrap();

        let p = pipeline(PipelinePhase::Executing, &[TaskStatus::Running]);
        store.save(&p).await.unwrap();

        let loaded = store.load(p.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, p.id);
        assert_eq!(loaded.phase, PipelinePhase::Executing);
        assert_eq!(loaded.tasks.len(), 1);
        assert!(store.load(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        let mut p = pipeline(PipelinePhase::Spawning, &[TaskStatus::Pending]);
        store.save(&p).await.unwrap();
        p.phase = PipelinePhase::Completed;
        store.save(&p).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].phase, PipelinePhase::Completed);
    }

    #[tokio::test]
    async fn test_incomplete_task_count_ignores_finished_pipelines() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        let active = pipeline(
            PipelinePhase::Executing,
            &[TaskStatus::Running, TaskStatus::Pending, TaskStatus::Failed],
        );
        // A crash can leave a finished pipeline with stale task states
        let finished = pipeline(PipelinePhase::Failed, &[TaskStatus::Running]);
        store.save(&active).await.unwrap();
        store.save(&finished).await.unwrap();

        assert_eq!(store.incomplete_task_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_load_all_skips_garbage_and_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = SnapshotStore::new(dir.path().join("nope"));
        assert!(missing.load_all().await.unwrap().is_empty());

        let store = SnapshotStore::new(dir.path());
        tokio::fs::write(dir.path().join("broken.json"), b"{not json")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), b"hello")
            .await
            .unwrap();
        store
            .save(&pipeline(PipelinePhase::Planning, &[]))
            .await
            .unwrap();

        assert_eq!(store.load_all().await.unwrap().len(), 1);
    }
}
