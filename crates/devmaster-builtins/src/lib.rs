//! Built-in agents and workflow templates for DevMaster.
//!
//! # Agents
//!
//! - [`EchoAgent`] — Repeats the request back; the smallest useful run.
//! - [`HandoffAgent`] — Pipeline stage that records work and passes control on.
//! - [`IntentClassifierAgent`] — Model or keyword task classification and routing.
//! - [`ChatAgent`] — Conversational replies, canned or model-backed.
//! - [`LlmAgent`] — Prompted model call that produces an artifact.
//! - [`ArtifactValidatorAgent`] — Records validation results for artifacts.
//! - [`HumanInterventionAgent`] — Escalation fallback for failing runs.

pub mod chat;
pub mod classifier;
pub mod echo;
pub mod handoff;
pub mod human;
pub mod keywords;
pub mod llm_agent;
pub mod validator;
pub mod workflows;

pub use chat::{ChatAgent, ChatIntent};
pub use classifier::{Classification, Complexity, IntentClassifierAgent};
pub use echo::EchoAgent;
pub use handoff::HandoffAgent;
pub use human::HumanInterventionAgent;
pub use keywords::KeywordSet;
pub use llm_agent::LlmAgent;
pub use validator::ArtifactValidatorAgent;
pub use workflows::{
    chat_workflow, register_placeholder_stages, workflow_for_task, workflow_template,
    WorkflowTemplate,
};

use devmaster_agent::{AgentRegistry, LlmClient};
use devmaster_core::DevMasterResult;
use std::sync::Arc;
use tracing::info;

/// Register the standard agents: Echo, IntentClassifier, ChatAgent and
/// HumanIntervention. The classifier and chat agent consult `llm` when given.
pub fn register_builtins(
    registry: &mut AgentRegistry,
    llm: Option<Arc<LlmClient>>,
) -> DevMasterResult<()> {
    let (classifier, chat) = match llm {
        Some(llm) => (
            IntentClassifierAgent::new()?.with_llm(Arc::clone(&llm)),
            ChatAgent::new()?.with_llm(llm),
        ),
        None => (IntentClassifierAgent::new()?, ChatAgent::new()?),
    };
    registry.register_agent(Arc::new(EchoAgent::new()))?;
    registry.register_agent(Arc::new(classifier))?;
    registry.register_agent(Arc::new(chat))?;
    registry.register_agent(Arc::new(HumanInterventionAgent::new()))?;
    info!(agents = registry.len(), "Registered built-in agents");
    Ok(())
}
