//! Pipeline Orchestrator
//!
//! Drives a pipeline from goal to finished:
//! 1. plan: classify the goal into at most `max_agents` tasks
//! 2. spawn: one agent per task, sequentially, through the pipeline's provider
//! 3. execute: apply agent callbacks and local process exits until every
//!    task is terminal, then finalize the pipeline exactly once
//!
//! All pipeline state lives behind one lock. Provisioning calls are made
//! with the lock released.

use chrono::Utc;
use convoy_core::domain::pipeline::{Pipeline, PipelinePhase, SpawnMode, Task, TaskStatus};
use convoy_core::dto::agent::AgentStatusReport;
use convoy_core::dto::pipeline::{PipelineSummary, StartPipeline, StartPipelineResponse};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::repository::{SnapshotStore, StoreError};
use crate::service::classifier::{Classifier, KeywordClassifier, catch_all};
use crate::service::lifecycle::LifecycleController;
use crate::service::registry::AgentRegistry;
use crate::spawn::{
    AgentExit, AgentLaunch, BashScriptBuilder, SpawnError, SpawnProvider, TaskScriptBuilder,
};

/// Commit ref recorded when a local agent exits 0 without calling back
pub const SYNTHETIC_COMMIT_REF: &str = "no-callback:exit-0";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Base URL agents call back to
    pub callback_base: String,
    pub default_max_agents: usize,
    pub max_agents_limit: usize,
    /// Lifecycle hold placed while a pipeline is active
    pub pipeline_hold: Duration,
    pub default_spawn_mode: SpawnMode,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            callback_base: "http://127.0.0.1:8080".to_string(),
            default_max_agents: 3,
            max_agents_limit: 10,
            pipeline_hold: Duration::from_secs(4 * 3600),
            default_spawn_mode: SpawnMode::Local,
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Pipeline not found: {0}")]
    NotFound(Uuid),

    #[error("Host is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Result of applying a complete/fail callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    Applied,
    /// No live binding for the agent (never bound, or already reported)
    UnknownAgent,
    TaskAlreadyTerminal,
}

impl CallbackOutcome {
    pub fn found(self) -> bool {
        self == CallbackOutcome::Applied
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    PhaseChanged {
        pipeline_id: Uuid,
        phase: PipelinePhase,
    },
    TaskUpdated {
        pipeline_id: Uuid,
        task_id: String,
        status: TaskStatus,
    },
    Finished {
        pipeline_id: Uuid,
        phase: PipelinePhase,
        error: Option<String>,
    },
}

enum Finish {
    Completed {
        commit_ref: Option<String>,
        branch: Option<String>,
    },
    Failed {
        error: String,
    },
}

#[derive(Default)]
struct State {
    pipelines: HashMap<Uuid, Pipeline>,
    registry: AgentRegistry,
    /// Kept out of snapshots
    github_tokens: HashMap<Uuid, String>,
}

struct Inner {
    config: OrchestratorConfig,
    store: SnapshotStore,
    lifecycle: LifecycleController,
    providers: HashMap<SpawnMode, Arc<dyn SpawnProvider>>,
    classifier: Arc<dyn Classifier>,
    scripts: Arc<dyn TaskScriptBuilder>,
    state: Mutex<State>,
    events: broadcast::Sender<PipelineEvent>,
}

#[derive(Clone)]
pub struct PipelineOrchestrator {
    inner: Arc<Inner>,
}

pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    store: SnapshotStore,
    lifecycle: LifecycleController,
    providers: HashMap<SpawnMode, Arc<dyn SpawnProvider>>,
    classifier: Arc<dyn Classifier>,
    scripts: Arc<dyn TaskScriptBuilder>,
}

impl OrchestratorBuilder {
    /// Registers a provider for the spawn mode it reports
    pub fn provider(mut self, provider: Arc<dyn SpawnProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn scripts(mut self, scripts: Arc<dyn TaskScriptBuilder>) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn build(self) -> PipelineOrchestrator {
        let (events, _) = broadcast::channel(128);
        PipelineOrchestrator {
            inner: Arc::new(Inner {
                config: self.config,
                store: self.store,
                lifecycle: self.lifecycle,
                providers: self.providers,
                classifier: self.classifier,
                scripts: self.scripts,
                state: Mutex::new(State::default()),
                events,
            }),
        }
    }
}

async fn persist(store: &SnapshotStore, pipeline: &Pipeline) {
    if let Err(e) = store.save(pipeline).await {
        warn!("Failed to persist pipeline {}: {}", pipeline.id, e);
    }
}

/// Moves a pipeline whose tasks are all terminal to its final phase
fn finalize(pipeline: &mut Pipeline) {
    let total = pipeline.tasks.len();
    let failed = pipeline.count_tasks(TaskStatus::Failed);

    if pipeline.count_tasks(TaskStatus::Completed) > 0 {
        pipeline.phase = PipelinePhase::Completed;
        pipeline.error = None;
    } else {
        pipeline.phase = PipelinePhase::Failed;
        pipeline.error = Some(format!("{} of {} tasks failed", failed, total));
    }
    pipeline.completed_at = Some(Utc::now());
}

impl PipelineOrchestrator {
    pub fn builder(
        config: OrchestratorConfig,
        store: SnapshotStore,
        lifecycle: LifecycleController,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            store,
            lifecycle,
            providers: HashMap::new(),
            classifier: Arc::new(KeywordClassifier),
            scripts: Arc::new(BashScriptBuilder::default()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: PipelineEvent) {
        let _ = self.inner.events.send(event);
    }

    // =========================================================================
    // Validation
    // =========================================================================

    fn validate(&self, req: &StartPipeline) -> Result<(usize, SpawnMode)> {
        let repo = req.repo_url.trim();
        if repo.is_empty() {
            return Err(OrchestratorError::Validation(
                "repoUrl cannot be empty".to_string(),
            ));
        }
        if !(repo.starts_with("https://") || repo.starts_with("http://") || repo.starts_with("git@"))
        {
            return Err(OrchestratorError::Validation(format!(
                "repoUrl '{}' is not an http(s) or ssh git URL",
                repo
            )));
        }

        if req.goal.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "goal cannot be empty".to_string(),
            ));
        }

        if req.provider.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "provider cannot be empty".to_string(),
            ));
        }

        let max_agents = req.max_agents.unwrap_or(self.inner.config.default_max_agents);
        if max_agents == 0 {
            return Err(OrchestratorError::Validation(
                "maxAgents must be at least 1".to_string(),
            ));
        }
        if max_agents > self.inner.config.max_agents_limit {
            return Err(OrchestratorError::Validation(format!(
                "maxAgents cannot exceed {}",
                self.inner.config.max_agents_limit
            )));
        }

        let mode = req.spawn_mode.unwrap_or(self.inner.config.default_spawn_mode);
        if !self.inner.providers.contains_key(&mode) {
            return Err(OrchestratorError::Validation(format!(
                "spawn mode '{}' is not configured",
                mode
            )));
        }

        Ok((max_agents, mode))
    }

    // =========================================================================
    // Pipelines
    // =========================================================================

    /// Accepts a pipeline and runs planning and spawning in the background
    pub async fn start(&self, req: StartPipeline) -> Result<StartPipelineResponse> {
        let (max_agents, spawn_mode) = self.validate(&req)?;
        let id = Uuid::new_v4();

        self.inner
            .lifecycle
            .acquire_pipeline_hold(id, self.inner.config.pipeline_hold)
            .await
            .map_err(|_| OrchestratorError::ShuttingDown)?;

        let pipeline = Pipeline {
            id,
            repo_url: req.repo_url.trim().to_string(),
            goal: req.goal.trim().to_string(),
            provider: req.provider.trim().to_string(),
            model: req.model,
            agent_type: req.agent_type,
            max_agents,
            spawn_mode,
            tasks: Vec::new(),
            phase: PipelinePhase::Planning,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        };

        {
            let mut state = self.inner.state.lock().await;
            if let Err(e) = self.inner.store.save(&pipeline).await {
                drop(state);
                self.inner.lifecycle.release_pipeline_hold(id).await;
                return Err(e.into());
            }
            state.pipelines.insert(id, pipeline);
            if let Some(token) = req.github_token.filter(|t| !t.is_empty()) {
                state.github_tokens.insert(id, token);
            }
        }

        info!(
            "Pipeline {} accepted ({} agents max, {} spawn)",
            id, max_agents, spawn_mode
        );

        let this = self.clone();
        tokio::spawn(async move {
            this.run_pipeline(id).await;
        });

        Ok(StartPipelineResponse {
            pipeline_id: id,
            phase: PipelinePhase::Planning,
        })
    }

    async fn run_pipeline(&self, id: Uuid) {
        let Some(goal) = self
            .inner
            .state
            .lock()
            .await
            .pipelines
            .get(&id)
            .map(|p| p.goal.clone())
        else {
            return;
        };

        let mut drafts = self.inner.classifier.classify(&goal);
        if drafts.is_empty() {
            debug!("Classifier found nothing in goal of {}, using catch-all", id);
            drafts.push(catch_all(&goal));
        }

        let task_ids: Vec<(usize, String)> = {
            let mut state = self.inner.state.lock().await;
            let Some(pipeline) = state.pipelines.get_mut(&id) else {
                return;
            };
            if pipeline.phase.is_terminal() {
                return;
            }

            drafts.truncate(pipeline.max_agents);
            let short = pipeline.short_id();
            pipeline.tasks = drafts
                .into_iter()
                .enumerate()
                .map(|(i, draft)| {
                    let n = i + 1;
                    Task::new(
                        n,
                        draft.title,
                        draft.description,
                        format!("convoy/{}/task-{}", short, n),
                    )
                })
                .collect();
            pipeline.phase = PipelinePhase::Spawning;

            info!("Pipeline {} planned {} tasks", id, pipeline.tasks.len());
            persist(&self.inner.store, pipeline).await;
            self.emit(PipelineEvent::PhaseChanged {
                pipeline_id: id,
                phase: PipelinePhase::Spawning,
            });

            pipeline
                .tasks
                .iter()
                .enumerate()
                .map(|(i, t)| (i + 1, t.id.clone()))
                .collect()
        };

        for (index, task_id) in task_ids {
            if !self.spawn_task(id, index, &task_id).await {
                info!("Pipeline {} finished while spawning, stopping", id);
                break;
            }
        }

        let finalized = {
            let mut state = self.inner.state.lock().await;
            if let Some(pipeline) = state.pipelines.get_mut(&id) {
                if !pipeline.phase.is_terminal() {
                    pipeline.phase = PipelinePhase::Executing;
                    persist(&self.inner.store, pipeline).await;
                    self.emit(PipelineEvent::PhaseChanged {
                        pipeline_id: id,
                        phase: PipelinePhase::Executing,
                    });
                }
            }
            // Every spawn may already have failed
            self.finalize_if_done(&mut state, id).await
        };

        if finalized {
            self.inner.lifecycle.release_pipeline_hold(id).await;
        }
    }

    /// Spawns the agent for one task; false once the pipeline is finished
    async fn spawn_task(&self, id: Uuid, index: usize, task_id: &str) -> bool {
        let (provider, launch) = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            let Some(pipeline) = state.pipelines.get_mut(&id) else {
                return false;
            };
            if pipeline.phase.is_terminal() {
                return false;
            }

            let provider = self.inner.providers.get(&pipeline.spawn_mode).cloned();
            let github_token = state.github_tokens.get(&id).cloned();
            let (repo_url, goal, model) = (
                pipeline.repo_url.clone(),
                pipeline.goal.clone(),
                pipeline.model.clone(),
            );
            let (provider_name, agent_type, mode) = (
                pipeline.provider.clone(),
                pipeline.agent_type.clone(),
                pipeline.spawn_mode,
            );

            let Some(task) = pipeline.task_mut(task_id) else {
                return true;
            };
            if task.status.is_terminal() {
                return true;
            }

            let Some(provider) = provider else {
                let err = SpawnError::ProviderUnavailable(format!("no {} provider", mode));
                task.error = Some(err.to_string());
                task.transition(TaskStatus::Failed);
                persist(&self.inner.store, pipeline).await;
                return true;
            };

            let agent_id = provider.next_agent_id(id, index);
            if !state.registry.bind(&agent_id, id, task_id) {
                task.error = Some(format!("agent id {} already in use", agent_id));
                task.transition(TaskStatus::Failed);
                persist(&self.inner.store, pipeline).await;
                return true;
            }
            task.agent_id = Some(agent_id.clone());

            let script = self.inner.scripts.build(task, &self.inner.config.callback_base);
            let launch = AgentLaunch {
                agent_id,
                pipeline_id: id,
                task_id: task.id.clone(),
                task_title: task.title.clone(),
                task_description: task.description.clone(),
                branch: task.branch.clone(),
                repo_url,
                goal,
                provider: provider_name,
                model,
                agent_type,
                github_token,
                callback_url: self.inner.config.callback_base.clone(),
                script,
            };
            (provider, launch)
        };

        let agent_id = launch.agent_id.clone();
        info!("Spawning agent {} for {} of pipeline {}", agent_id, task_id, id);
        let result = provider.spawn(launch).await;

        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        let Some(pipeline) = state.pipelines.get_mut(&id) else {
            return false;
        };
        let cancelled = pipeline.phase.is_terminal();

        match result {
            Ok(_) => {
                let mut updated = None;
                if let Some(task) = pipeline.task_mut(task_id) {
                    if task.transition(TaskStatus::Running) {
                        updated = Some(TaskStatus::Running);
                    }
                }
                if let Some(status) = updated {
                    persist(&self.inner.store, pipeline).await;
                    self.emit(PipelineEvent::TaskUpdated {
                        pipeline_id: id,
                        task_id: task_id.to_string(),
                        status,
                    });
                }
                drop(guard);

                if cancelled {
                    provider.stop(&agent_id).await;
                    return false;
                }
                true
            }
            Err(e) => {
                error!(
                    "Failed to spawn agent {} for {} of pipeline {}: {}",
                    agent_id, task_id, id, e
                );
                state.registry.unbind(&agent_id);
                if let Some(task) = pipeline.task_mut(task_id) {
                    if task.error.is_none() {
                        task.error = Some(e.to_string());
                    }
                    task.transition(TaskStatus::Failed);
                }
                persist(&self.inner.store, pipeline).await;
                self.emit(PipelineEvent::TaskUpdated {
                    pipeline_id: id,
                    task_id: task_id.to_string(),
                    status: TaskStatus::Failed,
                });
                !cancelled
            }
        }
    }

    /// Finalizes an executing pipeline once every task is terminal
    ///
    /// Returns true if it finalized; the caller then releases the
    /// pipeline's lifecycle hold after dropping the lock.
    async fn finalize_if_done(&self, state: &mut State, id: Uuid) -> bool {
        let Some(pipeline) = state.pipelines.get_mut(&id) else {
            return false;
        };
        if pipeline.phase != PipelinePhase::Executing || !pipeline.all_tasks_terminal() {
            return false;
        }

        finalize(pipeline);
        info!(
            "Pipeline {} {}: {} completed, {} failed",
            id,
            pipeline.phase,
            pipeline.count_tasks(TaskStatus::Completed),
            pipeline.count_tasks(TaskStatus::Failed)
        );
        persist(&self.inner.store, pipeline).await;
        self.emit(PipelineEvent::Finished {
            pipeline_id: id,
            phase: pipeline.phase,
            error: pipeline.error.clone(),
        });

        state.github_tokens.remove(&id);
        true
    }

    /// Fails every unfinished task, stops bound agents and finalizes
    pub async fn cancel(&self, id: Uuid) -> Result<Pipeline> {
        let (snapshot, agents, provider) = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            let pipeline = state
                .pipelines
                .get_mut(&id)
                .ok_or(OrchestratorError::NotFound(id))?;
            if pipeline.phase.is_terminal() {
                return Ok(pipeline.clone());
            }

            for task in pipeline.tasks.iter_mut() {
                if !task.status.is_terminal() {
                    task.error = Some("cancelled".to_string());
                    task.transition(TaskStatus::Failed);
                }
            }
            finalize(pipeline);
            if pipeline.phase == PipelinePhase::Failed {
                pipeline.error = Some("cancelled".to_string());
            }

            let agents = state.registry.agents_for(id);
            for agent_id in &agents {
                state.registry.unbind(agent_id);
            }

            info!("Pipeline {} cancelled, stopping {} agents", id, agents.len());
            persist(&self.inner.store, pipeline).await;
            self.emit(PipelineEvent::Finished {
                pipeline_id: id,
                phase: pipeline.phase,
                error: pipeline.error.clone(),
            });
            state.github_tokens.remove(&id);

            let provider = self.inner.providers.get(&pipeline.spawn_mode).cloned();
            (pipeline.clone(), agents, provider)
        };

        if let Some(provider) = provider {
            for agent_id in &agents {
                provider.stop(agent_id).await;
            }
        }
        self.inner.lifecycle.release_pipeline_hold(id).await;

        Ok(snapshot)
    }

    pub async fn get(&self, id: Uuid) -> Option<Pipeline> {
        self.inner.state.lock().await.pipelines.get(&id).cloned()
    }

    /// Summaries, newest first
    pub async fn list(&self) -> Vec<PipelineSummary> {
        let state = self.inner.state.lock().await;
        let mut summaries: Vec<PipelineSummary> =
            state.pipelines.values().map(PipelineSummary::from).collect();
        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        summaries
    }

    pub async fn active_pipelines(&self) -> usize {
        self.inner
            .state
            .lock()
            .await
            .pipelines
            .values()
            .filter(|p| !p.phase.is_terminal())
            .count()
    }

    /// Captured output of an agent, from whichever provider has it
    pub async fn agent_output(&self, agent_id: &str) -> Option<Vec<String>> {
        for provider in self.inner.providers.values() {
            if let Some(lines) = provider.output(agent_id).await {
                return Some(lines);
            }
        }
        None
    }

    // =========================================================================
    // Agent callbacks
    // =========================================================================

    /// Records a heartbeat; false for an unknown agent
    pub async fn heartbeat(&self, report: AgentStatusReport) -> bool {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        let Some(binding) = state.registry.resolve(&report.agent_id).cloned() else {
            debug!("Heartbeat from unknown agent {}", report.agent_id);
            return false;
        };
        let Some(pipeline) = state.pipelines.get_mut(&binding.pipeline_id) else {
            return false;
        };
        let Some(task) = pipeline.task_mut(&binding.task_id) else {
            return false;
        };

        task.last_heartbeat = Some(Utc::now());
        if report.progress.is_some() {
            task.progress = report.progress;
        }
        if report.message.is_some() {
            task.message = report.message;
        }
        debug!(
            "Heartbeat from {} ({}): {:?}",
            report.agent_id, binding.task_id, report.status
        );

        // An agent reporting in is running even if its spawn call has not returned yet
        if task.status == TaskStatus::Pending && task.transition(TaskStatus::Running) {
            persist(&self.inner.store, pipeline).await;
            self.emit(PipelineEvent::TaskUpdated {
                pipeline_id: binding.pipeline_id,
                task_id: binding.task_id,
                status: TaskStatus::Running,
            });
        }
        true
    }

    pub async fn complete(
        &self,
        agent_id: &str,
        commit_ref: Option<String>,
        branch: Option<String>,
    ) -> CallbackOutcome {
        self.finish_task(agent_id, Finish::Completed { commit_ref, branch })
            .await
    }

    pub async fn fail(&self, agent_id: &str, error: impl Into<String>) -> CallbackOutcome {
        self.finish_task(
            agent_id,
            Finish::Failed {
                error: error.into(),
            },
        )
        .await
    }

    /// Applies a terminal callback, then tears the agent's instance down
    async fn finish_task(&self, agent_id: &str, finish: Finish) -> CallbackOutcome {
        let (pipeline_id, provider, finalized) = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            let Some(binding) = state.registry.resolve(agent_id).cloned() else {
                warn!("Callback from unknown or finished agent {}", agent_id);
                return CallbackOutcome::UnknownAgent;
            };
            let Some(pipeline) = state.pipelines.get_mut(&binding.pipeline_id) else {
                state.registry.unbind(agent_id);
                return CallbackOutcome::UnknownAgent;
            };
            let Some(task) = pipeline.task_mut(&binding.task_id) else {
                state.registry.unbind(agent_id);
                return CallbackOutcome::UnknownAgent;
            };

            if task.status.is_terminal() {
                debug!(
                    "Ignoring callback from {}: {} already {}",
                    agent_id, task.id, task.status
                );
                state.registry.unbind(agent_id);
                return CallbackOutcome::TaskAlreadyTerminal;
            }

            match finish {
                Finish::Completed { commit_ref, branch } => {
                    info!(
                        "Agent {} completed {} ({})",
                        agent_id,
                        task.id,
                        commit_ref.as_deref().unwrap_or("no commit")
                    );
                    task.commit_ref = commit_ref;
                    if let Some(branch) = branch.filter(|b| !b.is_empty()) {
                        task.branch = branch;
                    }
                    task.transition(TaskStatus::Completed);
                }
                Finish::Failed { error } => {
                    warn!("Agent {} failed {}: {}", agent_id, task.id, error);
                    task.error = Some(error);
                    task.transition(TaskStatus::Failed);
                }
            }

            let status = task.status;
            let provider = self.inner.providers.get(&pipeline.spawn_mode).cloned();
            state.registry.unbind(agent_id);
            persist(&self.inner.store, pipeline).await;
            self.emit(PipelineEvent::TaskUpdated {
                pipeline_id: binding.pipeline_id,
                task_id: binding.task_id,
                status,
            });
            let finalized = self.finalize_if_done(state, binding.pipeline_id).await;
            (binding.pipeline_id, provider, finalized)
        };

        if let Some(provider) = provider {
            provider.stop(agent_id).await;
        }
        if finalized {
            self.inner.lifecycle.release_pipeline_hold(pipeline_id).await;
        }
        CallbackOutcome::Applied
    }

    // =========================================================================
    // Local process exits
    // =========================================================================

    /// Synthesizes the callback a local agent never sent
    pub async fn handle_agent_exit(&self, exit: AgentExit) -> CallbackOutcome {
        let bound = self
            .inner
            .state
            .lock()
            .await
            .registry
            .resolve(&exit.agent_id)
            .is_some();
        if !bound {
            debug!("Agent {} exited after reporting", exit.agent_id);
            return CallbackOutcome::UnknownAgent;
        }

        match exit.code {
            Some(0) => {
                info!(
                    "Agent {} exited 0 without reporting, assuming success",
                    exit.agent_id
                );
                self.complete(&exit.agent_id, Some(SYNTHETIC_COMMIT_REF.to_string()), None)
                    .await
            }
            Some(code) => {
                self.fail(
                    &exit.agent_id,
                    format!("agent process exited with code {} without reporting", code),
                )
                .await
            }
            None => {
                self.fail(
                    &exit.agent_id,
                    "agent process was killed by a signal without reporting",
                )
                .await
            }
        }
    }

    /// Feeds local process exits into `handle_agent_exit` until the channel closes
    pub fn spawn_exit_reconciler(
        &self,
        mut exits: mpsc::UnboundedReceiver<AgentExit>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(exit) = exits.recv().await {
                this.handle_agent_exit(exit).await;
            }
            debug!("Exit reconciler stopped");
        })
    }
}
