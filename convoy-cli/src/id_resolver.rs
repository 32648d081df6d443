//! ID resolver module
//!
//! Resolves pipeline id prefixes to full UUIDs by querying the API, so users
//! can type the short id shown in branch names instead of a full UUID.

use anyhow::{Context, Result, anyhow};
use convoy_client::OrchestratorClient;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a pipeline ID or prefix to a full UUID
///
/// # Errors
/// Returns an error if:
/// - No pipeline matches the prefix
/// - Multiple pipelines match the prefix (ambiguous)
/// - API call fails
pub async fn resolve_pipeline_id(
    client: &OrchestratorClient,
    id_or_prefix: &IdOrPrefix,
) -> Result<Uuid> {
    // If it's already a full UUID, return it
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let pipelines = client
        .list_pipelines()
        .await
        .context("Failed to fetch pipelines for ID resolution")?;

    let ids: Vec<Uuid> = pipelines
        .iter()
        .map(|p| p.id)
        .filter(|id| id_or_prefix.matches(*id))
        .collect();

    match ids.as_slice() {
        [] => Err(anyhow!(
            "No pipeline found with ID starting with '{}'",
            id_or_prefix.prefix()
        )),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple pipelines: {}",
                id_or_prefix.prefix(),
                ids.join(", ")
            ))
        }
    }
}
