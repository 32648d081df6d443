//! Remote spawn provider
//!
//! Provisions one isolated app + machine per agent through a machines-style
//! REST API and polls it until it reports `started`.

use async_trait::async_trait;
use convoy_core::domain::pipeline::SpawnMode;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::naming::instance_name;
use super::{AgentHandle, AgentLaunch, SpawnError, SpawnProvider, SpawnedAgent};

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub api_url: String,
    pub api_token: Option<String>,
    pub org: String,
    pub image: String,
    pub region: Option<String>,
    pub provision_timeout: Duration,
    pub poll_interval: Duration,
    /// Upper bound for any single API call
    pub request_timeout: Duration,
    pub name_prefix: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.machines.dev".to_string(),
            api_token: None,
            org: "personal".to_string(),
            image: "ghcr.io/convoy/agent:latest".to_string(),
            region: None,
            provision_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
            name_prefix: "convoy".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MachineInfo {
    id: String,
    #[serde(default)]
    state: String,
}

#[derive(Debug, Clone)]
struct RemoteAgent {
    app: String,
    machine_id: Option<String>,
}

struct Inner {
    config: RemoteConfig,
    client: Client,
    agents: Mutex<HashMap<String, RemoteAgent>>,
}

#[derive(Clone)]
pub struct RemoteSpawnProvider {
    inner: Arc<Inner>,
}

impl RemoteSpawnProvider {
    pub fn new(config: RemoteConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build machines API client, using defaults: {}", e);
                Client::new()
            });
        Self::with_client(config, client)
    }

    pub fn with_client(config: RemoteConfig, client: Client) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                client,
                agents: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/v1{}",
            self.inner.config.api_url.trim_end_matches('/'),
            path
        )
    }

    fn token(&self) -> Result<&str, SpawnError> {
        self.inner
            .config
            .api_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                SpawnError::ProviderUnavailable("no machines API token configured".to_string())
            })
    }

    async fn create_app(&self, token: &str, app: &str) -> Result<(), SpawnError> {
        let response = self
            .inner
            .client
            .post(self.url("/apps"))
            .bearer_auth(token)
            .json(&json!({
                "app_name": app,
                "org_slug": self.inner.config.org,
            }))
            .send()
            .await
            .map_err(|e| SpawnError::SpawnFailed(format!("create app {}: {}", app, e)))?;

        check(response, &format!("create app {}", app)).await?;
        Ok(())
    }

    async fn create_machine(
        &self,
        token: &str,
        app: &str,
        launch: &AgentLaunch,
    ) -> Result<MachineInfo, SpawnError> {
        let env: HashMap<String, String> = launch.env().into_iter().collect();
        let mut body = json!({
            "name": app,
            "config": {
                "image": self.inner.config.image,
                "env": env,
                "auto_destroy": true,
                "restart": { "policy": "no" },
            },
        });
        if let Some(region) = &self.inner.config.region {
            body["region"] = json!(region);
        }

        let response = self
            .inner
            .client
            .post(self.url(&format!("/apps/{}/machines", app)))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SpawnError::SpawnFailed(format!("create machine in {}: {}", app, e)))?;

        let response = check(response, &format!("create machine in {}", app)).await?;
        response
            .json::<MachineInfo>()
            .await
            .map_err(|e| SpawnError::SpawnFailed(format!("bad machine response: {}", e)))
    }

    async fn wait_started(&self, token: &str, app: &str, machine_id: &str) -> Result<(), SpawnError> {
        let url = self.url(&format!("/apps/{}/machines/{}", app, machine_id));
        loop {
            match self.inner.client.get(&url).bearer_auth(token).send().await {
                Ok(response) if response.status().is_success() => {
                    match response.json::<MachineInfo>().await {
                        Ok(machine) => {
                            debug!("Machine {} in {} is {}", machine.id, app, machine.state);
                            match machine.state.as_str() {
                                "started" => return Ok(()),
                                "failed" | "destroyed" => {
                                    return Err(SpawnError::SpawnFailed(format!(
                                        "machine {} entered state {}",
                                        machine_id, machine.state
                                    )));
                                }
                                _ => {}
                            }
                        }
                        Err(e) => debug!("Unreadable machine status for {}: {}", machine_id, e),
                    }
                }
                Ok(response) => debug!(
                    "Polling machine {} returned {}",
                    machine_id,
                    response.status()
                ),
                Err(e) => debug!("Polling machine {} failed: {}", machine_id, e),
            }

            tokio::time::sleep(self.inner.config.poll_interval).await;
        }
    }

    async fn teardown(&self, token: &str, agent: &RemoteAgent) {
        if let Some(machine_id) = &agent.machine_id {
            let url = self.url(&format!(
                "/apps/{}/machines/{}?force=true",
                agent.app, machine_id
            ));
            match self.inner.client.delete(&url).bearer_auth(token).send().await {
                Ok(r) if r.status().is_success() || r.status() == StatusCode::NOT_FOUND => {}
                Ok(r) => warn!("Deleting machine {} returned {}", machine_id, r.status()),
                Err(e) => warn!("Failed to delete machine {}: {}", machine_id, e),
            }
        }

        let url = self.url(&format!("/apps/{}", agent.app));
        match self.inner.client.delete(&url).bearer_auth(token).send().await {
            Ok(r) if r.status().is_success() || r.status() == StatusCode::NOT_FOUND => {
                info!("Tore down app {}", agent.app)
            }
            Ok(r) => warn!("Deleting app {} returned {}", agent.app, r.status()),
            Err(e) => warn!("Failed to delete app {}: {}", agent.app, e),
        }
    }
}

async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response, SpawnError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SpawnError::SpawnFailed(format!(
        "{} returned {}: {}",
        what, status, body
    )))
}

#[async_trait]
impl SpawnProvider for RemoteSpawnProvider {
    fn kind(&self) -> SpawnMode {
        SpawnMode::Remote
    }

    async fn spawn(&self, launch: AgentLaunch) -> Result<SpawnedAgent, SpawnError> {
        let token = self.token()?.to_string();
        let app = instance_name(&self.inner.config.name_prefix, &launch.agent_id);

        self.inner.agents.lock().await.insert(
            launch.agent_id.clone(),
            RemoteAgent {
                app: app.clone(),
                machine_id: None,
            },
        );

        if let Err(e) = self.create_app(&token, &app).await {
            self.inner.agents.lock().await.remove(&launch.agent_id);
            return Err(e);
        }
        let machine = match self.create_machine(&token, &app, &launch).await {
            Ok(machine) => machine,
            Err(e) => {
                self.stop_in_background(&launch.agent_id);
                return Err(e);
            }
        };
        info!("Created machine {} in app {}", machine.id, app);

        if let Some(agent) = self.inner.agents.lock().await.get_mut(&launch.agent_id) {
            agent.machine_id = Some(machine.id.clone());
        }

        let timeout = self.inner.config.provision_timeout;
        match tokio::time::timeout(timeout, self.wait_started(&token, &app, &machine.id)).await {
            Ok(Ok(())) => Ok(SpawnedAgent {
                agent_id: launch.agent_id,
                handle: AgentHandle::Remote {
                    app,
                    machine_id: machine.id,
                },
            }),
            Ok(Err(e)) => {
                self.stop_in_background(&launch.agent_id);
                Err(e)
            }
            Err(_) => {
                warn!(
                    "Machine {} in {} not started after {:?}, tearing down",
                    machine.id, app, timeout
                );
                self.stop_in_background(&launch.agent_id);
                Err(SpawnError::ProvisionTimeout {
                    instance: app,
                    timeout,
                })
            }
        }
    }

    async fn is_alive(&self, agent_id: &str) -> bool {
        let Ok(token) = self.token() else {
            return false;
        };
        let Some(agent) = self.inner.agents.lock().await.get(agent_id).cloned() else {
            return false;
        };
        let Some(machine_id) = agent.machine_id else {
            return false;
        };

        let url = self.url(&format!("/apps/{}/machines/{}", agent.app, machine_id));
        match self.inner.client.get(&url).bearer_auth(token).send().await {
            Ok(r) if r.status().is_success() => r
                .json::<MachineInfo>()
                .await
                .map(|m| m.state == "started")
                .unwrap_or(false),
            _ => false,
        }
    }

    async fn stop(&self, agent_id: &str) {
        let Some(agent) = self.inner.agents.lock().await.remove(agent_id) else {
            debug!("Remote agent {} already stopped or unknown", agent_id);
            return;
        };
        match self.token() {
            Ok(token) => self.teardown(token, &agent).await,
            Err(e) => warn!("Cannot tear down {}: {}", agent.app, e),
        }
    }
}

impl RemoteSpawnProvider {
    fn stop_in_background(&self, agent_id: &str) {
        let provider = self.clone();
        let agent_id = agent_id.to_string();
        tokio::spawn(async move {
            provider.stop(&agent_id).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::{Path, State},
        http::HeaderMap,
        routing::{delete, get, post},
    };
    use serde_json::Value;
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct FakeMachines {
        machine_state: String,
        calls: Vec<String>,
        created_env: Option<Value>,
    }

    type Fake = Arc<StdMutex<FakeMachines>>;

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            == Some("Bearer test-token")
    }

    async fn serve(machine_state: &str) -> (String, Fake) {
        let fake: Fake = Arc::new(StdMutex::new(FakeMachines {
            machine_state: machine_state.to_string(),
            ..Default::default()
        }));

        let app = Router::new()
            .route(
                "/v1/apps",
                post(
                    |State(f): State<Fake>, headers: HeaderMap, Json(body): Json<Value>| async move {
                        assert!(authorized(&headers));
                        f.lock().unwrap().calls.push(format!(
                            "create-app {}",
                            body["app_name"].as_str().unwrap_or_default()
                        ));
                        Json(json!({}))
                    },
                ),
            )
            .route(
                "/v1/apps/{app}/machines",
                post(
                    |State(f): State<Fake>, Path(app): Path<String>, Json(body): Json<Value>| async move {
                        let mut f = f.lock().unwrap();
                        f.calls.push(format!("create-machine {}", app));
                        f.created_env = Some(body["config"]["env"].clone());
                        Json(json!({ "id": "m-1", "state": "created" }))
                    },
                ),
            )
            .route(
                "/v1/apps/{app}/machines/{id}",
                get(
                    |State(f): State<Fake>, Path((_app, id)): Path<(String, String)>| async move {
                        let state = f.lock().unwrap().machine_state.clone();
                        Json(json!({ "id": id, "state": state }))
                    },
                )
                .delete(
                    |State(f): State<Fake>, Path((_app, id)): Path<(String, String)>| async move {
                        f.lock().unwrap().calls.push(format!("delete-machine {}", id));
                        Json(json!({}))
                    },
                ),
            )
            .route(
                "/v1/apps/{app}",
                delete(|State(f): State<Fake>, Path(app): Path<String>| async move {
                    f.lock().unwrap().calls.push(format!("delete-app {}", app));
                    Json(json!({}))
                }),
            )
            .with_state(fake.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), fake)
    }

    fn config(api_url: String) -> RemoteConfig {
        RemoteConfig {
            api_url,
            api_token: Some("test-token".into()),
            provision_timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    fn launch() -> AgentLaunch {
        AgentLaunch {
            agent_id: "agent-1a2b3c4d-1-deadbeef".into(),
            pipeline_id: Uuid::new_v4(),
            task_id: "task-1".into(),
            task_title: "Fix bugs".into(),
            task_description: "Fix them".into(),
            branch: "convoy/1a2b3c4d/task-1".into(),
            repo_url: "https://github.com/acme/widgets".into(),
            goal: "fix bugs".into(),
            provider: "anthropic".into(),
            model: None,
            agent_type: None,
            github_token: Some("ghp_x".into()),
            callback_url: "http://10.0.0.1:8080".into(),
            script: "echo hi".into(),
        }
    }

    async fn wait_for_call(fake: &Fake, call: &str) -> bool {
        for _ in 0..100 {
            if fake.lock().unwrap().calls.iter().any(|c| c == call) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_spawn_provisions_and_stop_tears_down() {
        let (url, fake) = serve("started").await;
        let provider = RemoteSpawnProvider::new(config(url));

        let spawned = provider.spawn(launch()).await.unwrap();
        let app = "conv-agent-1a2b3c4d-1-deadbeef".to_string();
        assert_eq!(
            spawned.handle,
            AgentHandle::Remote {
                app: app.clone(),
                machine_id: "m-1".into()
            }
        );

        {
            let f = fake.lock().unwrap();
            assert_eq!(f.calls[0], format!("create-app {}", app));
            assert_eq!(f.calls[1], format!("create-machine {}", app));
            let env = f.created_env.as_ref().unwrap();
            assert_eq!(env["CONVOY_TASK_ID"], "task-1");
            assert_eq!(env["GITHUB_TOKEN"], "ghp_x");
        }

        assert!(provider.is_alive("agent-1a2b3c4d-1-deadbeef").await);

        provider.stop("agent-1a2b3c4d-1-deadbeef").await;
        let calls = fake.lock().unwrap().calls.clone();
        assert!(calls.contains(&"delete-machine m-1".to_string()));
        assert!(calls.contains(&format!("delete-app {}", app)));

        // Second stop is a no-op
        provider.stop("agent-1a2b3c4d-1-deadbeef").await;
        assert_eq!(fake.lock().unwrap().calls.len(), calls.len());
        assert!(!provider.is_alive("agent-1a2b3c4d-1-deadbeef").await);
    }

    #[tokio::test]
    async fn test_provision_timeout_tears_down_in_background() {
        let (url, fake) = serve("starting").await;
        let provider = RemoteSpawnProvider::new(config(url));

        let err = provider.spawn(launch()).await.unwrap_err();
        match err {
            SpawnError::ProvisionTimeout { instance, timeout } => {
                assert_eq!(instance, "conv-agent-1a2b3c4d-1-deadbeef");
                assert_eq!(timeout, Duration::from_millis(300));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(wait_for_call(&fake, "delete-machine m-1").await);
    }

    #[tokio::test]
    async fn test_failed_machine_is_spawn_failure() {
        let (url, fake) = serve("failed").await;
        let provider = RemoteSpawnProvider::new(config(url));

        let err = provider.spawn(launch()).await.unwrap_err();
        assert!(matches!(err, SpawnError::SpawnFailed(_)));
        assert!(wait_for_call(&fake, "delete-machine m-1").await);
    }

    #[tokio::test]
    async fn test_missing_token_is_provider_unavailable() {
        let provider = RemoteSpawnProvider::new(RemoteConfig {
            api_url: "http://127.0.0.1:9".into(),
            api_token: None,
            ..Default::default()
        });

        let err = provider.spawn(launch()).await.unwrap_err();
        assert!(matches!(err, SpawnError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_hung_api_call_times_out() {
        let app = Router::new().route(
            "/v1/apps",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Json(json!({}))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let provider = RemoteSpawnProvider::new(RemoteConfig {
            request_timeout: Duration::from_millis(100),
            ..config(format!("http://{}", addr))
        });
        let err = tokio::time::timeout(Duration::from_secs(5), provider.spawn(launch()))
            .await
            .expect("API call was not bounded")
            .unwrap_err();
        assert!(matches!(err, SpawnError::SpawnFailed(_)), "{err}");
        assert!(provider.inner.agents.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_api_error_is_spawn_failure() {
        // Nothing routes /v1/apps on this server, so app creation gets a 404
        let app = Router::new();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let provider = RemoteSpawnProvider::new(config(format!("http://{}", addr)));
        let err = provider.spawn(launch()).await.unwrap_err();
        assert!(err.to_string().contains("404"), "{err}");
    }
}
