//! Shared test fixtures

use async_trait::async_trait;
use convoy_core::domain::pipeline::SpawnMode;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use crate::repository::SnapshotStore;
use crate::service::lifecycle::{LifecycleConfig, LifecycleController};
use crate::service::orchestrator::{OrchestratorConfig, PipelineOrchestrator};
use crate::spawn::{AgentHandle, AgentLaunch, SpawnError, SpawnProvider, SpawnedAgent};

/// Local-mode provider that records calls and fails chosen task indices
#[derive(Default)]
pub(crate) struct MockProvider {
    failing: HashSet<usize>,
    launches: Mutex<Vec<AgentLaunch>>,
    stopped: Mutex<Vec<String>>,
}

impl MockProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fails spawning for the given 1-based task indices
    pub(crate) fn failing(indices: &[usize]) -> Self {
        Self {
            failing: indices.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub(crate) fn launches(&self) -> Vec<AgentLaunch> {
        self.launches.lock().unwrap().clone()
    }

    pub(crate) fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpawnProvider for MockProvider {
    fn kind(&self) -> SpawnMode {
        SpawnMode::Local
    }

    async fn spawn(&self, launch: AgentLaunch) -> Result<SpawnedAgent, SpawnError> {
        let index: usize = launch
            .task_id
            .trim_start_matches("task-")
            .parse()
            .unwrap_or(0);
        let agent_id = launch.agent_id.clone();
        self.launches.lock().unwrap().push(launch);

        if self.failing.contains(&index) {
            return Err(SpawnError::SpawnFailed("mock spawn failure".to_string()));
        }
        Ok(SpawnedAgent {
            agent_id,
            handle: AgentHandle::Local { pid: None },
        })
    }

    async fn is_alive(&self, agent_id: &str) -> bool {
        !self.stopped.lock().unwrap().iter().any(|a| a == agent_id)
    }

    async fn stop(&self, agent_id: &str) {
        self.stopped.lock().unwrap().push(agent_id.to_string());
    }

    async fn output(&self, agent_id: &str) -> Option<Vec<String>> {
        self.launches
            .lock()
            .unwrap()
            .iter()
            .any(|l| l.agent_id == agent_id)
            .then(|| vec![format!("{} started", agent_id)])
    }
}

pub(crate) struct Harness {
    pub orchestrator: PipelineOrchestrator,
    pub lifecycle: LifecycleController,
    pub store: SnapshotStore,
    _dir: TempDir,
}

/// Orchestrator over a temp snapshot dir, with a lifecycle that never
/// reaches its minimum uptime during a test
pub(crate) async fn harness(provider: Arc<MockProvider>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("pipelines"));
    store.init().await.unwrap();

    let lifecycle = LifecycleController::new(
        LifecycleConfig {
            min_uptime: Duration::from_secs(3600),
            state_dir: dir.path().to_path_buf(),
            ..LifecycleConfig::default()
        },
        Arc::new(store.clone()),
        Arc::new(|_| {}),
    );

    let orchestrator =
        PipelineOrchestrator::builder(OrchestratorConfig::default(), store.clone(), lifecycle.clone())
            .provider(provider)
            .build();

    Harness {
        orchestrator,
        lifecycle,
        store,
        _dir: dir,
    }
}
