use async_trait::async_trait;
use devmaster_agent::{Agent, AgentDescriptor, AgentOutput};
use devmaster_core::{DevMasterResult, Message, StateContainer, StateDelta};
use serde_json::json;
use tracing::warn;

/// Fallback that escalates a struggling run to a person.
///
/// Summarises every failed invocation so far, flags `requires_human_input`
/// in the context, and ends the run.
pub struct HumanInterventionAgent {
    descriptor: AgentDescriptor,
}

impl HumanInterventionAgent {
    pub const NAME: &'static str = "HumanIntervention";

    pub fn new() -> Self {
        Self {
            descriptor: AgentDescriptor::new(
                Self::NAME,
                "Escalates failed runs for human intervention",
            ),
        }
    }
}

impl Default for HumanInterventionAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for HumanInterventionAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, state: &StateContainer) -> DevMasterResult<AgentOutput> {
        let failures = state.failed_agents();
        warn!(failures = failures.len(), "Escalating run to a human");

        let mut summary = format!(
            "Human intervention required after {} failed invocation(s).",
            failures.len()
        );
        for record in failures {
            summary.push_str(&format!(
                "\n- {} (attempt {}): {}",
                record.agent_name, record.attempt, record.error_summary
            ));
        }

        let delta = StateDelta::new()
            .with_context("requires_human_input", json!(true))
            .with_context("failure_summary", json!(failures))
            .with_message(Message::agent(Self::NAME, summary));
        Ok(AgentOutput::new(delta).complete())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use devmaster_core::END;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_summarises_failures_and_ends_run() {
        let mut state = StateContainer::new(Uuid::new_v4(), "Coder");
        state.record_failure("Coder", 1, "timed out after 50ms").unwrap();
        state.record_failure("Coder", 2, "rate limited").unwrap();

        let output = HumanInterventionAgent::new().execute(&state).await.unwrap();

        assert_eq!(output.next_agent.as_deref(), Some(END));
        assert_eq!(output.delta.context["requires_human_input"], json!(true));
        assert_eq!(output.delta.context["failure_summary"].as_array().unwrap().len(), 2);
        let text = &output.delta.messages[0].content;
        assert!(text.starts_with("Human intervention required after 2 failed invocation(s)."));
        assert!(text.contains("- Coder (attempt 2): rate limited"));
    }
}
