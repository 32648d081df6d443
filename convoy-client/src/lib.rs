//! Convoy HTTP Client
//!
//! A typed HTTP client for the Convoy orchestrator: the control API
//! (pipelines, lifecycle, sessions) and the agent callback routes.
//!
//! # Example
//!
//! ```no_run
//! use convoy_client::OrchestratorClient;
//! use convoy_core::dto::pipeline::StartPipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = OrchestratorClient::new("http://localhost:8080").with_token("secret");
//!
//!     let started = client.start_pipeline(StartPipeline {
//!         repo_url: "https://github.com/acme/widgets".to_string(),
//!         goal: "fix the flaky tests".to_string(),
//!         provider: "anthropic".to_string(),
//!         model: None,
//!         github_token: None,
//!         max_agents: Some(2),
//!         agent_type: None,
//!         spawn_mode: None,
//!     }).await?;
//!
//!     println!("Started pipeline: {}", started.pipeline_id);
//!     Ok(())
//! }
//! ```

mod agents;
pub mod error;
mod lifecycle;
mod pipelines;
mod sessions;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

/// HTTP client for the Convoy orchestrator API
///
/// Methods are organized into logical groups:
/// - Pipeline management (start, list, get, cancel)
/// - Lifecycle control (status, hold, extend, shutdown, restart, rebuild)
/// - Session registration
/// - Agent callbacks (status, complete, fail)
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
    /// Sent as a bearer token on control API requests
    token: Option<String>,
}

impl OrchestratorClient {
    /// Create a new orchestrator client
    ///
    /// # Example
    /// ```
    /// use convoy_client::OrchestratorClient;
    ///
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new orchestrator client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            token: None,
        }
    }

    /// Attach the control API token; empty tokens are ignored
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.is_empty()).then_some(token);
        self
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::debug!("Request failed with status {}: {}", status, error_text);
            return Err(ClientError::from_response(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle a response that carries no content (e.g., DELETE operations)
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::from_response(status.as_u16(), error_text));
        }

        Ok(())
    }
}
