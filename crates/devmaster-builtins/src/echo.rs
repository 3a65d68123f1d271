use async_trait::async_trait;
use devmaster_agent::{Agent, AgentDescriptor, AgentOutput};
use devmaster_core::{DevMasterResult, Message, Role, StateContainer, StateDelta};

/// Repeats the latest user message (or the request) back and ends the run.
pub struct EchoAgent {
    descriptor: AgentDescriptor,
}

impl EchoAgent {
    pub const NAME: &'static str = "Echo";

    pub fn new() -> Self {
        Self {
            descriptor: AgentDescriptor::new(Self::NAME, "Echoes the user's request"),
        }
    }
}

impl Default for EchoAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, state: &StateContainer) -> DevMasterResult<AgentOutput> {
        let text = state
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map_or(state.user_request.as_str(), |m| m.content.as_str());
        Ok(AgentOutput::new(
            StateDelta::new().with_message(Message::agent(Self::NAME, text)),
        )
        .complete())
    }
}
