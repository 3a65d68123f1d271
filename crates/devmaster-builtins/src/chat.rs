use crate::keywords::KeywordSet;
use async_trait::async_trait;
use devmaster_agent::{Agent, AgentDescriptor, AgentOutput, Backoff, LlmClient, RetryPolicy};
use devmaster_core::{DevMasterResult, Message, Role, StateContainer, StateDelta};
use serde_json::json;
use std::sync::Arc;

const GREETING: &str = "Hello! I'm DevMaster, your AI-powered development assistant. \
I can help you build full-stack applications, create APIs, design user interfaces, \
and much more. What would you like to create today?";

const CAPABILITIES: &str = "I can help you with:\n\
- Full-stack application development\n\
- Backend API creation\n\
- Frontend UI development\n\
- Code review and optimization\n\
- Debugging and error fixing\n\
- Documentation generation\n\
- Test creation\n\
- Deployment assistance\n\n\
Just describe what you want to build, and I'll take care of the rest!";

const HELP: &str = "To get started, try asking me to:\n\
- 'Build a todo list application'\n\
- 'Create a REST API for user management'\n\
- 'Design a landing page for my startup'\n\
- 'Review my Python code'\n\
- 'Help me debug this error'\n\n\
I'll analyze your request and use the appropriate workflow to help you.";

const FALLBACK: &str = "I understand you're looking for conversational assistance. \
While I'm primarily designed for development tasks, I'm here to help! \
Could you tell me more about what you need?";

const SYSTEM_PROMPT: &str = "You are DevMaster, an AI development assistant. \
Answer conversational questions briefly and steer the user towards describing \
what they want to build.";

/// Which canned reply a request got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatIntent {
    Greeting,
    Capabilities,
    Help,
    Other,
}

impl ChatIntent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Capabilities => "capabilities",
            Self::Help => "help",
            Self::Other => "default",
        }
    }

    fn reply(self) -> &'static str {
        match self {
            Self::Greeting => GREETING,
            Self::Capabilities => CAPABILITIES,
            Self::Help => HELP,
            Self::Other => FALLBACK,
        }
    }
}

/// Answers conversational requests and ends the run.
///
/// Without a model it picks one of a few canned replies; with one it asks the
/// model, passing the conversation so far.
pub struct ChatAgent {
    descriptor: AgentDescriptor,
    greetings: KeywordSet,
    capabilities: KeywordSet,
    help: KeywordSet,
    llm: Option<Arc<LlmClient>>,
}

impl ChatAgent {
    pub const NAME: &'static str = "ChatAgent";

    pub fn new() -> DevMasterResult<Self> {
        Ok(Self {
            descriptor: AgentDescriptor::new(Self::NAME, "Handles conversational chat interactions"),
            greetings: KeywordSet::new(&[
                "hello", "hi", "hey", "greetings", "good morning", "good afternoon",
            ])?,
            capabilities: KeywordSet::new(&[
                "what can you do", "capabilities", "features", "help me with",
            ])?,
            help: KeywordSet::new(&["help", "how to", "get started", "example", "guide"])?,
            llm: None,
        })
    }

    pub fn with_llm(mut self, llm: Arc<LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn intent(&self, request: &str) -> ChatIntent {
        if self.greetings.matches(request) {
            ChatIntent::Greeting
        } else if self.capabilities.matches(request) {
            ChatIntent::Capabilities
        } else if self.help.matches(request) {
            ChatIntent::Help
        } else {
            ChatIntent::Other
        }
    }
}

#[async_trait]
impl Agent for ChatAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        self.llm.as_ref().map(|_| {
            RetryPolicy::new(
                3,
                Backoff::Exponential {
                    base_ms: 500,
                    max_ms: 8_000,
                },
            )
        })
    }

    async fn execute(&self, state: &StateContainer) -> DevMasterResult<AgentOutput> {
        let intent = self.intent(&state.user_request);
        let (content, source) = match &self.llm {
            Some(llm) => {
                let mut conversation: Vec<Message> = state
                    .messages
                    .iter()
                    .filter(|m| m.role != Role::System)
                    .cloned()
                    .collect();
                if !conversation.iter().any(|m| m.role == Role::User) {
                    conversation.insert(0, Message::user(state.user_request.clone()));
                }
                let reply = llm.complete(Some(SYSTEM_PROMPT), &conversation).await?;
                (reply.content, "llm")
            }
            None => (intent.reply().to_string(), "canned"),
        };
        let message = Message::agent(Self::NAME, content)
            .with_metadata("interaction_type", json!("conversational"))
            .with_metadata("intent", json!(intent.as_str()))
            .with_metadata("source", json!(source));
        Ok(AgentOutput::new(StateDelta::new().with_message(message)).complete())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use devmaster_agent::MockBackend;
    use devmaster_core::END;
    use uuid::Uuid;

    fn state(request: &str) -> StateContainer {
        let mut state = StateContainer::new(Uuid::new_v4(), ChatAgent::NAME);
        state.user_request = request.into();
        state
    }

    #[test]
    fn test_intents() {
        let chat = ChatAgent::new().unwrap();
        assert_eq!(chat.intent("Hey DevMaster"), ChatIntent::Greeting);
        assert_eq!(chat.intent("what can you do?"), ChatIntent::Capabilities);
        assert_eq!(chat.intent("how to get started"), ChatIntent::Help);
        assert_eq!(chat.intent("tell me about this thing"), ChatIntent::Other);
    }

    #[tokio::test]
    async fn test_canned_reply_ends_run() {
        let chat = ChatAgent::new().unwrap();
        let output = chat.execute(&state("hello")).await.unwrap();
        assert_eq!(output.next_agent.as_deref(), Some(END));
        let message = &output.delta.messages[0];
        assert!(message.content.starts_with("Hello! I'm DevMaster"));
        assert_eq!(message.metadata["intent"], json!("greeting"));
        assert_eq!(message.metadata["source"], json!("canned"));
        assert!(chat.retry_policy().is_none());
    }

    #[tokio::test]
    async fn test_llm_backed_reply() {
        let llm = Arc::new(LlmClient::from_backend(Box::new(MockBackend::scripted([
            "Sure, tell me more.",
        ]))));
        let chat = ChatAgent::new().unwrap().with_llm(llm);
        let output = chat.execute(&state("chat with me")).await.unwrap();
        assert_eq!(output.delta.messages[0].content, "Sure, tell me more.");
        assert_eq!(output.delta.messages[0].metadata["source"], json!("llm"));
        assert_eq!(chat.retry_policy().unwrap().max_attempts, 3);
    }
}
