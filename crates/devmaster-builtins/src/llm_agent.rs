use async_trait::async_trait;
use devmaster_agent::{Agent, AgentDescriptor, AgentOutput, LlmClient, RetryPolicy};
use devmaster_core::{DevMasterError, DevMasterResult, Message, Role, StateContainer, StateDelta};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// A prompted model call: sends the conversation (plus any requested
/// artifacts as context) to the model and records the reply as a message and
/// an artifact.
pub struct LlmAgent {
    descriptor: AgentDescriptor,
    system_prompt: String,
    llm: Arc<LlmClient>,
    artifact_key: String,
    inputs: Vec<String>,
    next: Option<String>,
    retry: RetryPolicy,
}

impl LlmAgent {
    /// The reply is stored under an artifact named after the agent.
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>, llm: Arc<LlmClient>) -> Self {
        let name = name.into();
        Self {
            descriptor: AgentDescriptor::new(name.clone(), "Model-backed agent"),
            system_prompt: system_prompt.into(),
            llm,
            artifact_key: name,
            inputs: Vec::new(),
            next: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.descriptor.description = description.into();
        self
    }

    pub fn with_artifact_key(mut self, key: impl Into<String>) -> Self {
        self.artifact_key = key.into();
        self
    }

    /// Artifacts written by earlier agents to include in the prompt.
    pub fn with_inputs<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.inputs = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn then(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn conversation(&self, state: &StateContainer) -> DevMasterResult<Vec<Message>> {
        let mut conversation = vec![Message::user(state.user_request.clone())];
        conversation.extend(
            state
                .messages
                .iter()
                .filter(|m| m.role != Role::System)
                .cloned(),
        );
        for key in &self.inputs {
            let value = state.artifacts.get(key).ok_or_else(|| {
                DevMasterError::execution(
                    self.descriptor.name.clone(),
                    format!("missing input artifact '{key}'"),
                )
            })?;
            let rendered = serde_json::to_string_pretty(value)?;
            conversation.push(Message::user(format!("Artifact `{key}`:\n{rendered}")));
        }
        Ok(conversation)
    }
}

#[async_trait]
impl Agent for LlmAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        Some(self.retry)
    }

    async fn execute(&self, state: &StateContainer) -> DevMasterResult<AgentOutput> {
        let conversation = self.conversation(state)?;
        let reply = self
            .llm
            .complete(Some(&self.system_prompt), &conversation)
            .await?;
        debug!(
            agent = %self.descriptor.name,
            chars = reply.content.len(),
            stop_reason = ?reply.stop_reason,
            "Model replied"
        );

        let delta = StateDelta::new()
            .with_message(Message::agent(self.descriptor.name.clone(), reply.content.clone()))
            .with_artifact(self.artifact_key.clone(), json!(reply.content));
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
    use devmaster_agent::MockBackend;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_reply_becomes_message_and_artifact() {
        let llm = Arc::new(LlmClient::from_backend(Box::new(MockBackend::scripted([
            "CREATE TABLE todo (id SERIAL PRIMARY KEY);",
        ]))));
        let agent = LlmAgent::new("DataModelingAgent", "You design schemas.", llm)
            .with_artifact_key("schema")
            .then("BackendLogicAgent");
        let mut state = StateContainer::new(Uuid::new_v4(), "DataModelingAgent");
        state.user_request = "a todo app".into();

        let output = agent.execute(&state).await.unwrap();
        assert_eq!(
            output.delta.artifacts["schema"],
            json!("CREATE TABLE todo (id SERIAL PRIMARY KEY);")
        );
        assert_eq!(output.next_agent.as_deref(), Some("BackendLogicAgent"));
        assert_eq!(agent.retry_policy(), Some(RetryPolicy::default()));
    }

    #[tokio::test]
    async fn test_inputs_are_rendered_into_prompt() {
        // The echo backend returns the last message it was sent.
        let llm = Arc::new(LlmClient::from_backend(Box::new(MockBackend::echo())));
        let agent = LlmAgent::new("BackendLogicAgent", "You write handlers.", llm)
            .with_inputs(["schema"]);
        let mut state = StateContainer::new(Uuid::new_v4(), "BackendLogicAgent");
        state.artifacts.insert("schema".into(), json!({"table": "todo"}));

        let output = agent.execute(&state).await.unwrap();
        let content = &output.delta.messages[0].content;
        assert!(content.starts_with("Artifact `schema`"));
        assert!(content.contains("\"table\": \"todo\""));
    }

    #[tokio::test]
    async fn test_missing_input_is_an_execution_error() {
        let llm = Arc::new(LlmClient::from_backend(Box::new(MockBackend::echo())));
        let agent = LlmAgent::new("Coder", "prompt", llm).with_inputs(["plan"]);
        let state = StateContainer::new(Uuid::new_v4(), "Coder");
        let err = agent.execute(&state).await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("missing input artifact 'plan'"));
    }
}
