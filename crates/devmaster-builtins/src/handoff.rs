use async_trait::async_trait;
use devmaster_agent::{Agent, AgentDescriptor, AgentOutput};
use devmaster_core::{DevMasterResult, Message, StateContainer, StateDelta};
use serde_json::json;

/// A pipeline stage that records a note, optionally writes an artifact, and
/// passes control on.
///
/// Without an explicit successor the routing graph decides what runs next.
/// Useful as a stand-in for stages whose real agent is not wired up yet.
pub struct HandoffAgent {
    descriptor: AgentDescriptor,
    note: String,
    artifact: Option<(String, serde_json::Value)>,
    next: Option<String>,
}

impl HandoffAgent {
    pub fn new(name: impl Into<String>, note: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            descriptor: AgentDescriptor::new(name.clone(), format!("Pipeline stage {name}")),
            note: note.into(),
            artifact: None,
            next: None,
        }
    }

    /// A stage that only announces itself and records a placeholder artifact
    /// under its own name.
    pub fn placeholder(name: impl Into<String>) -> Self {
        let name = name.into();
        let note = format!("{name} finished (placeholder stage)");
        let artifact = json!({ "stage": name, "placeholder": true });
        Self::new(name.clone(), note).with_artifact(name, artifact)
    }

    pub fn with_artifact(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.artifact = Some((key.into(), value));
        self
    }

    pub fn then(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }
}

#[async_trait]
impl Agent for HandoffAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _state: &StateContainer) -> DevMasterResult<AgentOutput> {
        let mut delta =
            StateDelta::new().with_message(Message::agent(self.descriptor.name.clone(), &self.note));
        if let Some((key, value)) = &self.artifact {
            delta = delta.with_artifact(key.clone(), value.clone());
        }
        let output = AgentOutput::new(delta);
        Ok(match &self.next {
            Some(next) => output.hand_off_to(next.clone()),
            None => output,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_handoff_with_successor() {
        let agent = HandoffAgent::new("Planner", "plan ready")
            .with_artifact("plan", json!(["models", "routes"]))
            .then("Coder");
        let state = StateContainer::new(Uuid::new_v4(), "Planner");
        let output = agent.execute(&state).await.unwrap();
        assert_eq!(output.next_agent.as_deref(), Some("Coder"));
        assert_eq!(output.delta.messages[0].content, "plan ready");
        assert_eq!(output.delta.artifacts["plan"], json!(["models", "routes"]));
    }

    #[tokio::test]
    async fn test_placeholder_defers_to_graph() {
        let agent = HandoffAgent::placeholder("TestingAgent");
        let state = StateContainer::new(Uuid::new_v4(), "TestingAgent");
        let output = agent.execute(&state).await.unwrap();
        assert!(output.next_agent.is_none());
        assert_eq!(output.delta.artifacts["TestingAgent"]["placeholder"], json!(true));
    }
}
