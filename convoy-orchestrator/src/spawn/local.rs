//! Local spawn provider
//!
//! Runs the task script as a supervised child process:
//! - one working directory per agent under the work root
//! - stdout/stderr captured line by line into a bounded buffer
//! - the exit code is reported on a channel so the orchestrator can
//!   reconcile agents whose own callback never arrived
//! - stopped agents are evicted; the output of the most recent ones is kept

use async_trait::async_trait;
use convoy_core::domain::pipeline::SpawnMode;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{AgentExit, AgentHandle, AgentLaunch, SpawnError, SpawnProvider, SpawnedAgent};

/// Lines of output kept per agent
pub const DEFAULT_OUTPUT_LIMIT: usize = 2000;

/// Stopped agents whose output stays readable
pub const RETAINED_OUTPUTS: usize = 64;

type OutputBuffer = Arc<Mutex<VecDeque<String>>>;

struct LocalAgent {
    kill: Option<oneshot::Sender<()>>,
    alive: Arc<AtomicBool>,
    output: OutputBuffer,
}

pub struct LocalSpawnProvider {
    work_root: PathBuf,
    shell: String,
    output_limit: usize,
    exits: mpsc::UnboundedSender<AgentExit>,
    agents: Mutex<HashMap<String, LocalAgent>>,
    /// Output of stopped agents, oldest first
    retired: Mutex<VecDeque<(String, OutputBuffer)>>,
}

impl LocalSpawnProvider {
    /// Creates a provider that reports process exits on `exits`
    pub fn new(work_root: impl Into<PathBuf>, exits: mpsc::UnboundedSender<AgentExit>) -> Self {
        Self {
            work_root: work_root.into(),
            shell: "bash".to_string(),
            output_limit: DEFAULT_OUTPUT_LIMIT,
            exits,
            agents: Mutex::new(HashMap::new()),
            retired: Mutex::new(VecDeque::new()),
        }
    }

    /// Uses a different shell binary to interpret task scripts
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_output_limit(mut self, limit: usize) -> Self {
        self.output_limit = limit.max(1);
        self
    }

    fn pump<R>(
        agent_id: String,
        stream: &'static str,
        reader: R,
        output: OutputBuffer,
        limit: usize,
    ) -> tokio::task::JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        debug!(agent_id = %agent_id, stream, "{}", line);
                        let mut buffer = output.lock().await;
                        if buffer.len() >= limit {
                            buffer.pop_front();
                        }
                        buffer.push_back(line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed to read {} of agent {}: {}", stream, agent_id, e);
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl SpawnProvider for LocalSpawnProvider {
    fn kind(&self) -> SpawnMode {
        SpawnMode::Local
    }

    async fn spawn(&self, launch: AgentLaunch) -> Result<SpawnedAgent, SpawnError> {
        let workdir = self.work_root.join(&launch.agent_id);
        tokio::fs::create_dir_all(&workdir).await.map_err(|e| {
            SpawnError::SpawnFailed(format!(
                "failed to create work directory {}: {}",
                workdir.display(),
                e
            ))
        })?;

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(&launch.script)
            .current_dir(&workdir)
            .envs(launch.env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SpawnError::ProviderUnavailable(format!(
                    "shell '{}' not found on this host",
                    self.shell
                )),
                _ => SpawnError::SpawnFailed(format!("failed to start agent process: {}", e)),
            })?;

        let pid = child.id();
        let agent_id = launch.agent_id.clone();
        info!("Started local agent {} (pid {:?})", agent_id, pid);

        let output: OutputBuffer = Arc::new(Mutex::new(VecDeque::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let (kill_tx, kill_rx) = oneshot::channel();

        let mut pumps = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            pumps.push(Self::pump(
                agent_id.clone(),
                "stdout",
                stdout,
                output.clone(),
                self.output_limit,
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(Self::pump(
                agent_id.clone(),
                "stderr",
                stderr,
                output.clone(),
                self.output_limit,
            ));
        }

        self.agents.lock().await.insert(
            agent_id.clone(),
            LocalAgent {
                kill: Some(kill_tx),
                alive: alive.clone(),
                output,
            },
        );

        let exits = self.exits.clone();
        let supervised_id = agent_id.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill agent {}: {}", supervised_id, e);
                    }
                    child.wait().await
                }
            };

            for pump in pumps {
                let _ = pump.await;
            }
            alive.store(false, Ordering::SeqCst);

            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!("Failed to wait on agent {}: {}", supervised_id, e);
                    None
                }
            };
            info!("Local agent {} exited with {:?}", supervised_id, code);

            if exits
                .send(AgentExit {
                    agent_id: supervised_id.clone(),
                    code,
                })
                .is_err()
            {
                debug!("No exit listener for agent {}", supervised_id);
            }
        });

        Ok(SpawnedAgent {
            agent_id,
            handle: AgentHandle::Local { pid },
        })
    }

    async fn is_alive(&self, agent_id: &str) -> bool {
        self.agents
            .lock()
            .await
            .get(agent_id)
            .map(|a| a.alive.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    async fn stop(&self, agent_id: &str) {
        let Some(mut agent) = self.agents.lock().await.remove(agent_id) else {
            debug!("Local agent {} already stopped or unknown", agent_id);
            return;
        };

        if let Some(kill) = agent.kill.take() {
            if agent.alive.load(Ordering::SeqCst) {
                info!("Stopping local agent {}", agent_id);
            }
            // The supervisor may already have finished
            let _ = kill.send(());
        }

        let mut retired = self.retired.lock().await;
        if retired.len() >= RETAINED_OUTPUTS {
            retired.pop_front();
        }
        retired.push_back((agent_id.to_string(), agent.output));
    }

    async fn output(&self, agent_id: &str) -> Option<Vec<String>> {
        let live = self.agents.lock().await.get(agent_id).map(|a| a.output.clone());
        let output = match live {
            Some(output) => output,
            None => self
                .retired
                .lock()
                .await
                .iter()
                .rev()
                .find(|(id, _)| id == agent_id)
                .map(|(_, output)| output.clone())?,
        };
        let lines = output.lock().await.iter().cloned().collect();
        Some(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    fn launch(agent_id: &str, script: &str) -> AgentLaunch {
        AgentLaunch {
            agent_id: agent_id.into(),
            pipeline_id: Uuid::new_v4(),
            task_id: "task-1".into(),
            task_title: "Fix bugs".into(),
            task_description: "Fix them".into(),
            branch: "convoy/test/task-1".into(),
            repo_url: "https://github.com/acme/widgets".into(),
            goal: "fix bugs".into(),
            provider: "anthropic".into(),
            model: None,
            agent_type: None,
            github_token: None,
            callback_url: "http://127.0.0.1:9".into(),
            script: script.into(),
        }
    }

    async fn next_exit(rx: &mut mpsc::UnboundedReceiver<AgentExit>) -> AgentExit {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("agent did not exit in time")
            .expect("exit channel closed")
    }

    #[tokio::test]
    async fn test_reports_exit_code_and_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let provider = LocalSpawnProvider::new(dir.path(), tx).with_shell("sh");

        let spawned = provider
            .spawn(launch(
                "agent-ok",
                "echo \"working on $CONVOY_TASK_ID\"; echo oops >&2; exit 0",
            ))
            .await
            .unwrap();
        assert_eq!(spawned.agent_id, "agent-ok");

        let exit = next_exit(&mut rx).await;
        assert_eq!(
            exit,
            AgentExit {
                agent_id: "agent-ok".into(),
                code: Some(0)
            }
        );

        let output = provider.output("agent-ok").await.unwrap();
        assert!(output.contains(&"working on task-1".to_string()));
        assert!(output.contains(&"oops".to_string()));
        assert!(!provider.is_alive("agent-ok").await);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let provider = LocalSpawnProvider::new(dir.path(), tx).with_shell("sh");

        provider.spawn(launch("agent-bad", "exit 3")).await.unwrap();
        assert_eq!(next_exit(&mut rx).await.code, Some(3));
    }

    #[tokio::test]
    async fn test_stop_kills_running_agent_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let provider = LocalSpawnProvider::new(dir.path(), tx).with_shell("sh");

        provider.spawn(launch("agent-slow", "sleep 30")).await.unwrap();
        assert!(provider.is_alive("agent-slow").await);

        provider.stop("agent-slow").await;
        let exit = next_exit(&mut rx).await;
        assert_ne!(exit.code, Some(0));
        assert!(!provider.is_alive("agent-slow").await);

        provider.stop("agent-slow").await;
        provider.stop("never-existed").await;
    }

    #[tokio::test]
    async fn test_stop_evicts_agent_but_keeps_output() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let provider = LocalSpawnProvider::new(dir.path(), tx).with_shell("sh");

        provider.spawn(launch("agent-done", "echo finished")).await.unwrap();
        next_exit(&mut rx).await;

        provider.stop("agent-done").await;
        assert!(provider.agents.lock().await.is_empty());
        assert_eq!(
            provider.output("agent-done").await.unwrap(),
            vec!["finished".to_string()]
        );
    }

    #[tokio::test]
    async fn test_retained_output_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let provider = LocalSpawnProvider::new(dir.path(), tx).with_shell("sh");

        for i in 0..=RETAINED_OUTPUTS {
            let id = format!("agent-{}", i);
            provider.spawn(launch(&id, "true")).await.unwrap();
            next_exit(&mut rx).await;
            provider.stop(&id).await;
        }

        assert_eq!(provider.retired.lock().await.len(), RETAINED_OUTPUTS);
        assert!(provider.output("agent-0").await.is_none());
        assert!(provider.output(&format!("agent-{}", RETAINED_OUTPUTS)).await.is_some());
    }

    #[tokio::test]
    async fn test_missing_shell_is_provider_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let provider =
            LocalSpawnProvider::new(dir.path(), tx).with_shell("/definitely/not/a/shell");

        let err = provider.spawn(launch("agent-x", "true")).await.unwrap_err();
        assert!(matches!(err, SpawnError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_output_buffer_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let provider = LocalSpawnProvider::new(dir.path(), tx)
            .with_shell("sh")
            .with_output_limit(3);

        provider
            .spawn(launch("agent-chatty", "for i in 1 2 3 4 5; do echo $i; done"))
            .await
            .unwrap();
        next_exit(&mut rx).await;

        assert_eq!(
            provider.output("agent-chatty").await.unwrap(),
            vec!["3".to_string(), "4".to_string(), "5".to_string()]
        );
    }
}
