use async_trait::async_trait;
use devmaster_agent::{Agent, AgentDescriptor, AgentOutput};
use devmaster_core::{
    DevMasterError, DevMasterResult, Message, StateContainer, StateDelta, ValidationResult,
};
use serde_json::Value;

/// Checks that required artifacts exist and are non-empty, recording one
/// `validation_results` entry per artifact under `artifact:<key>`.
///
/// In strict mode a failed check is returned as an execution error so the
/// engine's retry and fallback policy takes over; otherwise the results are
/// only recorded.
pub struct ArtifactValidatorAgent {
    descriptor: AgentDescriptor,
    required: Vec<String>,
    strict: bool,
}

impl ArtifactValidatorAgent {
    pub const NAME: &'static str = "ArtifactValidator";

    pub fn new<S: Into<String>>(required: impl IntoIterator<Item = S>) -> Self {
        Self {
            descriptor: AgentDescriptor::new(Self::NAME, "Validates required artifacts"),
            required: required.into_iter().map(Into::into).collect(),
            strict: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.descriptor.name = name.into();
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    fn check(value: Option<&Value>) -> ValidationResult {
        match value {
            None => ValidationResult::fail("artifact is missing"),
            Some(Value::Null) => ValidationResult::fail("artifact is null"),
            Some(Value::String(s)) if s.trim().is_empty() => {
                ValidationResult::fail("artifact is an empty string")
            }
            Some(Value::Array(items)) if items.is_empty() => {
                ValidationResult::fail("artifact is an empty list")
            }
            Some(Value::Object(fields)) if fields.is_empty() => {
                ValidationResult::fail("artifact is an empty object")
            }
            Some(_) => ValidationResult::pass(),
        }
    }
}

#[async_trait]
impl Agent for ArtifactValidatorAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, state: &StateContainer) -> DevMasterResult<AgentOutput> {
        let mut delta = StateDelta::new();
        let mut failed = Vec::new();
        for key in &self.required {
            let result = Self::check(state.artifacts.get(key));
            if !result.passed {
                failed.push(key.as_str());
            }
            delta = delta.with_validation(format!("artifact:{key}"), result.with_detail(key.clone()));
        }

        if self.strict && !failed.is_empty() {
            return Err(DevMasterError::execution(
                self.descriptor.name.clone(),
                format!("artifact validation failed: {}", failed.join(", ")),
            ));
        }

        let summary = if failed.is_empty() {
            format!("All {} required artifacts are present.", self.required.len())
        } else {
            format!("Invalid artifacts: {}.", failed.join(", "))
        };
        Ok(delta
            .with_message(Message::agent(self.descriptor.name.clone(), summary))
            .into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn state() -> StateContainer {
        let mut state = StateContainer::new(Uuid::new_v4(), ArtifactValidatorAgent::NAME);
        state.artifacts.insert("schema".into(), json!("CREATE TABLE t ();"));
        state.artifacts.insert("routes".into(), json!([]));
        state
    }

    #[tokio::test]
    async fn test_records_results_per_artifact() {
        let agent = ArtifactValidatorAgent::new(["schema", "routes", "ui"]);
        let output = agent.execute(&state()).await.unwrap();
        let results = &output.delta.validation_results;
        assert!(results["artifact:schema"].passed);
        assert!(!results["artifact:routes"].passed);
        assert!(!results["artifact:ui"].passed);
        assert_eq!(output.delta.messages[0].content, "Invalid artifacts: routes, ui.");
        assert!(output.next_agent.is_none());
    }

    #[tokio::test]
    async fn test_strict_mode_fails_the_invocation() {
        let agent = ArtifactValidatorAgent::new(["ui"]).strict();
        let err = agent.execute(&state()).await.unwrap_err();
        assert!(matches!(err, DevMasterError::AgentExecution { cause, .. } if cause.contains("ui")));
    }

    #[tokio::test]
    async fn test_all_present() {
        let agent = ArtifactValidatorAgent::new(["schema"]).named("SchemaCheck").strict();
        let output = agent.execute(&state()).await.unwrap();
        assert!(output.delta.validation_results["artifact:schema"].passed);
        assert_eq!(
            output.delta.messages[0].agent_name.as_deref(),
            Some("SchemaCheck")
        );
    }
}
