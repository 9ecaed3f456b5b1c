//! Agent registry, built once at process start and passed by reference.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::models::agent::AgentDefinition;
use crate::{AppError, Result};

/// Validated, immutable agent definitions keyed by id.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentDefinition>>,
}

impl AgentRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a set of definitions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if any definition is invalid or an id is
    /// declared twice.
    pub fn from_definitions(agents: impl IntoIterator<Item = AgentDefinition>) -> Result<Self> {
        let mut registry = Self::new();
        for agent in agents {
            registry.register(agent)?;
        }
        Ok(registry)
    }

    /// Validate and add one definition.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the definition is invalid or its id is
    /// already registered.
    pub fn register(&mut self, agent: AgentDefinition) -> Result<()> {
        agent.validate()?;
        if self.agents.contains_key(&agent.id) {
            return Err(AppError::Config(format!(
                "agent {} registered twice",
                agent.id
            )));
        }
        info!(agent_id = %agent.id, steps = agent.steps.len(), "agent registered");
        self.agents.insert(agent.id.clone(), Arc::new(agent));
        Ok(())
    }

    /// Look up a definition.
    #[must_use]
    pub fn get(&self, agent_id: &str) -> Option<Arc<AgentDefinition>> {
        self.agents.get(agent_id).cloned()
    }

    /// Registered ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.keys().cloned().collect();
        ids.sort();
        ids
    }
}
