use crate::agent::{Agent, AgentDescriptor};
use devmaster_core::{DevMasterError, DevMasterResult, END};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Builds an agent instance for a run.
pub type AgentFactory = Arc<dyn Fn() -> Arc<dyn Agent> + Send + Sync>;

/// Name → factory mapping for every agent a workflow may route to.
///
/// Populate it once at startup, then hand it to the orchestrator behind an
/// `Arc`. From that point it is shared immutably, so registering while a run
/// is in flight cannot be expressed.
#[derive(Default)]
pub struct AgentRegistry {
    factories: BTreeMap<String, AgentFactory>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: AgentFactory,
    ) -> DevMasterResult<()> {
        let name = name.into();
        if name == END {
            return Err(DevMasterError::Config(format!(
                "'{END}' is reserved for the terminal sentinel"
            )));
        }
        if self.factories.contains_key(&name) {
            return Err(DevMasterError::DuplicateName(name));
        }
        info!(agent = %name, "Registered agent");
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Register a shared instance under its descriptor name.
    pub fn register_agent(&mut self, agent: Arc<dyn Agent>) -> DevMasterResult<()> {
        let name = agent.descriptor().name.clone();
        self.register(name, Arc::new(move || Arc::clone(&agent)))
    }

    /// Build the agent registered under `name`.
    pub fn resolve(&self, name: &str) -> DevMasterResult<Arc<dyn Agent>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| DevMasterError::UnknownAgent(name.to_string()))?;
        debug!(agent = %name, "Resolved agent");
        Ok(factory())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Descriptors of every registered agent, in name order.
    pub fn descriptors(&self) -> Vec<AgentDescriptor> {
        self.factories
            .values()
            .map(|factory| factory().descriptor().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
