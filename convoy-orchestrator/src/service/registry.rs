//! Agent Registry
//!
//! Maps live agent ids to the pipeline task they work on so inbound
//! callbacks can be routed. Owned by the orchestrator state; it does no
//! locking of its own.

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Where a live agent's callbacks should land
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentBinding {
    pub pipeline_id: Uuid,
    pub task_id: String,
}

#[derive(Debug, Default)]
pub struct AgentRegistry {
    bindings: HashMap<String, AgentBinding>,
    /// Ids that were bound once; they are never handed out again
    retired: HashSet<String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds an agent to a task
    ///
    /// Returns false if the id is currently bound or was used before.
    pub fn bind(&mut self, agent_id: &str, pipeline_id: Uuid, task_id: &str) -> bool {
        if self.bindings.contains_key(agent_id) || self.retired.contains(agent_id) {
            return false;
        }
        self.bindings.insert(
            agent_id.to_string(),
            AgentBinding {
                pipeline_id,
                task_id: task_id.to_string(),
            },
        );
        true
    }

    pub fn resolve(&self, agent_id: &str) -> Option<&AgentBinding> {
        self.bindings.get(agent_id)
    }

    pub fn unbind(&mut self, agent_id: &str) -> Option<AgentBinding> {
        let binding = self.bindings.remove(agent_id)?;
        self.retired.insert(agent_id.to_string());
        Some(binding)
    }

    /// Agent ids currently bound to tasks of a pipeline
    pub fn agents_for(&self, pipeline_id: Uuid) -> Vec<String> {
        self.bindings
            .iter()
            .filter(|(_, b)| b.pipeline_id == pipeline_id)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
