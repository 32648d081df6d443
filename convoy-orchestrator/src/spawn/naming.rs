//! Agent and instance naming
//!
//! Remote instance names must fit the provisioning backend: lowercase
//! alphanumerics and hyphens, at most `MAX_INSTANCE_NAME_LEN` characters.
//! Truncation is deterministic and always keeps the unique agent suffix.

use convoy_core::domain::pipeline::short_id;
use uuid::Uuid;

pub const MAX_INSTANCE_NAME_LEN: usize = 30;

/// Generates a collision-free agent id for a pipeline task
pub fn agent_id(pipeline_id: Uuid, task_index: usize) -> String {
    let nonce = Uuid::new_v4().simple().to_string();
    format!(
        "agent-{}-{}-{}",
        short_id(pipeline_id),
        task_index,
        &nonce[..8]
    )
}

/// Lowercases and maps everything outside `[a-z0-9-]` to a single hyphen
pub fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Backend instance name for an agent
///
/// The prefix is shortened first; if the agent id alone is too long its
/// tail (the random part) is kept.
pub fn instance_name(prefix: &str, agent_id: &str) -> String {
    let id = sanitize(agent_id);
    if id.len() >= MAX_INSTANCE_NAME_LEN {
        return id[id.len() - MAX_INSTANCE_NAME_LEN..]
            .trim_start_matches('-')
            .to_string();
    }

    let prefix = sanitize(prefix);
    let room = MAX_INSTANCE_NAME_LEN - id.len();
    if prefix.is_empty() || room < 2 {
        return id;
    }

    let keep = prefix.len().min(room - 1);
    let prefix = prefix[..keep].trim_end_matches('-');
    if prefix.is_empty() {
        id
    } else {
        format!("{}-{}", prefix, id)
    }
}
