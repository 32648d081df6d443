//! Configuration module
//!
//! Handles CLI configuration: orchestrator URL and API token.

use convoy_client::OrchestratorClient;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the orchestrator service
    pub orchestrator_url: String,
    /// Control API token, if the orchestrator requires one
    pub token: Option<String>,
}

impl Config {
    pub fn client(&self) -> OrchestratorClient {
        let client = OrchestratorClient::new(&self.orchestrator_url);
        match &self.token {
            Some(token) => client.with_token(token.clone()),
            None => client,
        }
    }
}
