//! Orchestrator configuration
//!
//! Everything is read from `CONVOY_*` environment variables with defaults
//! suitable for a single local host.

use convoy_core::domain::pipeline::SpawnMode;
use std::path::PathBuf;
use std::time::Duration;

use crate::service::lifecycle::LifecycleConfig;
use crate::service::orchestrator::OrchestratorConfig;
use crate::spawn::remote::RemoteConfig;
use crate::spawn::script::DEFAULT_AGENT_COMMAND;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind_addr: String,

    /// Base URL agents use for callbacks (e.g., "http://10.0.0.5:8080")
    pub public_url: String,

    /// Snapshots, agent workdirs and the rebuild marker live here
    pub state_dir: PathBuf,

    /// Shared secret for the control API; unset disables auth
    pub api_token: Option<String>,

    /// Webhook receiving lifecycle and pipeline notifications
    pub webhook_url: Option<String>,

    pub default_spawn_mode: SpawnMode,

    pub machines_api_url: String,
    pub machines_api_token: Option<String>,
    pub machines_org: String,
    pub agent_image: String,
    pub agent_region: Option<String>,
    pub provision_timeout: Duration,

    /// Command run inside each agent checkout
    pub agent_command: String,

    pub min_uptime: Duration,
    pub check_interval: Duration,
    pub grace_period: Duration,

    /// Lifecycle hold placed while pipelines are active
    pub pipeline_hold: Duration,
    pub default_max_agents: usize,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - CONVOY_BIND_ADDR (default: 0.0.0.0:8080)
    /// - CONVOY_PUBLIC_URL (default: http://127.0.0.1:8080)
    /// - CONVOY_STATE_DIR (default: ./.convoy)
    /// - CONVOY_API_TOKEN, CONVOY_WEBHOOK_URL
    /// - CONVOY_SPAWN_MODE (local|remote, default: local)
    /// - CONVOY_MACHINES_API_URL, CONVOY_MACHINES_API_TOKEN, CONVOY_MACHINES_ORG
    /// - CONVOY_AGENT_IMAGE, CONVOY_AGENT_REGION, CONVOY_AGENT_COMMAND
    /// - CONVOY_PROVISION_TIMEOUT_SECS (default: 120)
    /// - CONVOY_MIN_UPTIME_SECS (default: 600)
    /// - CONVOY_CHECK_INTERVAL_SECS (default: 60)
    /// - CONVOY_GRACE_PERIOD_SECS (default: 300)
    /// - CONVOY_PIPELINE_HOLD_SECS (default: 14400)
    /// - CONVOY_DEFAULT_MAX_AGENTS (default: 3)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secs = |key: &str, default: Duration| -> anyhow::Result<Duration> {
            match var(key) {
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| anyhow::anyhow!("{} must be a number of seconds", key)),
                None => Ok(default),
            }
        };

        let default_spawn_mode = match var("CONVOY_SPAWN_MODE") {
            Some(v) => v
                .parse::<SpawnMode>()
                .map_err(|e| anyhow::anyhow!("CONVOY_SPAWN_MODE: {}", e))?,
            None => defaults.default_spawn_mode,
        };

        let default_max_agents = match var("CONVOY_DEFAULT_MAX_AGENTS") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .map_err(|_| anyhow::anyhow!("CONVOY_DEFAULT_MAX_AGENTS must be a number"))?,
            None => defaults.default_max_agents,
        };

        Ok(Self {
            bind_addr: var("CONVOY_BIND_ADDR").unwrap_or(defaults.bind_addr),
            public_url: var("CONVOY_PUBLIC_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.public_url),
            state_dir: var("CONVOY_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
            api_token: var("CONVOY_API_TOKEN"),
            webhook_url: var("CONVOY_WEBHOOK_URL"),
            default_spawn_mode,
            machines_api_url: var("CONVOY_MACHINES_API_URL").unwrap_or(defaults.machines_api_url),
            machines_api_token: var("CONVOY_MACHINES_API_TOKEN"),
            machines_org: var("CONVOY_MACHINES_ORG").unwrap_or(defaults.machines_org),
            agent_image: var("CONVOY_AGENT_IMAGE").unwrap_or(defaults.agent_image),
            agent_region: var("CONVOY_AGENT_REGION"),
            provision_timeout: secs("CONVOY_PROVISION_TIMEOUT_SECS", defaults.provision_timeout)?,
            agent_command: var("CONVOY_AGENT_COMMAND").unwrap_or(defaults.agent_command),
            min_uptime: secs("CONVOY_MIN_UPTIME_SECS", defaults.min_uptime)?,
            check_interval: secs("CONVOY_CHECK_INTERVAL_SECS", defaults.check_interval)?,
            grace_period: secs("CONVOY_GRACE_PERIOD_SECS", defaults.grace_period)?,
            pipeline_hold: secs("CONVOY_PIPELINE_HOLD_SECS", defaults.pipeline_hold)?,
            default_max_agents,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if !self.public_url.starts_with("http://") && !self.public_url.starts_with("https://") {
            anyhow::bail!("public_url must start with http:// or https://");
        }

        if self.check_interval.is_zero() {
            anyhow::bail!("check_interval must be greater than 0");
        }

        if self.default_max_agents == 0 {
            anyhow::bail!("default_max_agents must be greater than 0");
        }

        if self.default_spawn_mode == SpawnMode::Remote && self.machines_api_token.is_none() {
            anyhow::bail!("remote spawn mode requires CONVOY_MACHINES_API_TOKEN");
        }

        Ok(())
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            min_uptime: self.min_uptime,
            check_interval: self.check_interval,
            grace_period: self.grace_period,
            state_dir: self.state_dir.clone(),
            ..LifecycleConfig::default()
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let defaults = OrchestratorConfig::default();
        OrchestratorConfig {
            callback_base: self.public_url.clone(),
            default_max_agents: self.default_max_agents.min(defaults.max_agents_limit),
            pipeline_hold: self.pipeline_hold,
            default_spawn_mode: self.default_spawn_mode,
            ..defaults
        }
    }

    /// `None` when no machines API token is configured
    pub fn remote_config(&self) -> Option<RemoteConfig> {
        let token = self.machines_api_token.clone()?;
        Some(RemoteConfig {
            api_url: self.machines_api_url.clone(),
            api_token: Some(token),
            org: self.machines_org.clone(),
            image: self.agent_image.clone(),
            region: self.agent_region.clone(),
            provision_timeout: self.provision_timeout,
            ..RemoteConfig::default()
        })
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.state_dir.join("pipelines")
    }

    pub fn agent_work_root(&self) -> PathBuf {
        self.state_dir.join("agents")
    }
}

impl Default for Config {
    fn default() -> Self {
        let lifecycle = LifecycleConfig::default();
        let orchestrator = OrchestratorConfig::default();
        let remote = RemoteConfig::default();

        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            public_url: orchestrator.callback_base,
            state_dir: PathBuf::from("./.convoy"),
            api_token: None,
            webhook_url: None,
            default_spawn_mode: orchestrator.default_spawn_mode,
            machines_api_url: remote.api_url,
            machines_api_token: None,
            machines_org: remote.org,
            agent_image: remote.image,
            agent_region: None,
            provision_timeout: remote.provision_timeout,
            agent_command: DEFAULT_AGENT_COMMAND.to_string(),
            min_uptime: lifecycle.min_uptime,
            check_interval: lifecycle.check_interval,
            grace_period: lifecycle.grace_period,
            pipeline_hold: orchestrator.pipeline_hold,
            default_max_agents: orchestrator.default_max_agents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.public_url, "http://127.0.0.1:8080");
        assert_eq!(config.min_uptime, Duration::from_secs(600));
        assert_eq!(config.grace_period, Duration::from_secs(300));
        assert_eq!(config.pipeline_hold, Duration::from_secs(14400));
        assert_eq!(config.default_max_agents, 3);
        assert_eq!(config.default_spawn_mode, SpawnMode::Local);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env_overrides() {
        let config = from_vars(&[
            ("CONVOY_BIND_ADDR", "127.0.0.1:9000"),
            ("CONVOY_PUBLIC_URL", "http://10.0.0.5:9000/"),
            ("CONVOY_STATE_DIR", "/var/lib/convoy"),
            ("CONVOY_API_TOKEN", "secret"),
            ("CONVOY_SPAWN_MODE", "remote"),
            ("CONVOY_MACHINES_API_TOKEN", "fm-token"),
            ("CONVOY_GRACE_PERIOD_SECS", "60"),
            ("CONVOY_DEFAULT_MAX_AGENTS", "5"),
            ("CONVOY_WEBHOOK_URL", ""),
        ])
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.public_url, "http://10.0.0.5:9000");
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/convoy"));
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.webhook_url, None);
        assert_eq!(config.default_spawn_mode, SpawnMode::Remote);
        assert_eq!(config.grace_period, Duration::from_secs(60));
        assert!(config.validate().is_ok());

        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.callback_base, "http://10.0.0.5:9000");
        assert_eq!(orchestrator.default_max_agents, 5);

        let remote = config.remote_config().unwrap();
        assert_eq!(remote.api_token.as_deref(), Some("fm-token"));

        assert_eq!(
            config.lifecycle_config().state_dir,
            PathBuf::from("/var/lib/convoy")
        );
        assert_eq!(config.snapshot_dir(), PathBuf::from("/var/lib/convoy/pipelines"));
    }

    #[test]
    fn test_from_env_rejects_bad_values() {
        assert!(from_vars(&[("CONVOY_SPAWN_MODE", "cloud")]).is_err());
        assert!(from_vars(&[("CONVOY_MIN_UPTIME_SECS", "ten")]).is_err());
        assert!(from_vars(&[("CONVOY_DEFAULT_MAX_AGENTS", "-1")]).is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.remote_config().is_none());

        config.public_url = "not-a-url".to_string();
        assert!(config.validate().is_err());
        config.public_url = "https://convoy.example.com".to_string();
        assert!(config.validate().is_ok());

        config.default_spawn_mode = SpawnMode::Remote;
        assert!(config.validate().is_err());
        config.machines_api_token = Some("token".to_string());
        assert!(config.validate().is_ok());

        config.default_max_agents = 0;
        assert!(config.validate().is_err());
    }
}
