use crate::retry::RetryPolicy;
use async_trait::async_trait;
use devmaster_core::{DevMasterResult, StateContainer, StateDelta, END};
use serde::{Deserialize, Serialize};

/// Metadata describing an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    pub description: String,
}

impl AgentDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// What one agent invocation hands back to the execution loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentOutput {
    pub delta: StateDelta,
    /// Explicit handoff. Takes precedence over `delta.active_agent` and over
    /// any routing edge.
    pub next_agent: Option<String>,
}

impl AgentOutput {
    pub fn new(delta: StateDelta) -> Self {
        Self {
            delta,
            next_agent: None,
        }
    }

    /// Hand control to `agent` after this step.
    pub fn hand_off_to(mut self, agent: impl Into<String>) -> Self {
        self.next_agent = Some(agent.into());
        self
    }

    /// End the workflow after this step.
    pub fn complete(self) -> Self {
        self.hand_off_to(END)
    }
}

impl From<StateDelta> for AgentOutput {
    fn from(delta: StateDelta) -> Self {
        Self::new(delta)
    }
}

/// Trait every orchestrated agent implements.
///
/// `execute` receives a snapshot of the run state, never the canonical
/// container, and returns the changes it wants merged. External side effects
/// (I/O, model calls) are the agent's business and must tolerate retries.
#[async_trait]
pub trait Agent: Send + Sync {
    fn descriptor(&self) -> &AgentDescriptor;

    /// Bounded retry policy for failed invocations. `None` means one attempt.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    async fn execute(&self, state: &StateContainer) -> DevMasterResult<AgentOutput>;
}
