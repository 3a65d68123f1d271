//! Workflow templates: which agents handle which kind of task, in what order.
//!
//! Every workflow starts at the intent classifier and then walks its stages
//! in sequence before ending.

use crate::chat::ChatAgent;
use crate::classifier::IntentClassifierAgent;
use crate::handoff::HandoffAgent;
use devmaster_agent::AgentRegistry;
use devmaster_core::{DevMasterResult, TaskKind, END};
use devmaster_orchestrator::OrchestrationGraph;
use std::sync::Arc;
use tracing::debug;

const CHAT: &[&str] = &[ChatAgent::NAME];
const FULLSTACK: &[&str] = &[
    "PlanningAgent",
    "DataModelingAgent",
    "BackendLogicAgent",
    "APIGenerationAgent",
    "SDKGenerationAgent",
    "FrontendAgent",
    "TestingAgent",
    "IntegrationAgent",
];
const BACKEND: &[&str] = &[
    "PlanningAgent",
    "DataModelingAgent",
    "BackendLogicAgent",
    "APIGenerationAgent",
    "TestingAgent",
];
const FRONTEND: &[&str] = &["PlanningAgent", "FrontendAgent", "TestingAgent"];
const REVIEW: &[&str] = &["CodeReviewAgent"];
const DEBUGGING: &[&str] = &["DebuggingAgent", "TestingAgent"];
const DOCUMENTATION: &[&str] = &["DocumentationAgent"];
const TESTING: &[&str] = &["TestingAgent"];
const DEPLOYMENT: &[&str] = &["DeploymentAgent"];

/// Ordered stages run after classification for one task kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowTemplate {
    pub name: &'static str,
    pub stages: &'static [&'static str],
}

pub fn workflow_template(kind: TaskKind) -> WorkflowTemplate {
    let (name, stages) = match kind {
        TaskKind::ConversationalChat => ("ChatWorkflow", CHAT),
        TaskKind::FullstackDevelopment => ("DevelopmentWorkflow", FULLSTACK),
        TaskKind::BackendOnly => ("BackendWorkflow", BACKEND),
        TaskKind::FrontendOnly => ("FrontendWorkflow", FRONTEND),
        TaskKind::CodeReview => ("CodeReviewWorkflow", REVIEW),
        TaskKind::Debugging => ("DebuggingWorkflow", DEBUGGING),
        TaskKind::Documentation => ("DocumentationWorkflow", DOCUMENTATION),
        TaskKind::Testing => ("TestingWorkflow", TESTING),
        TaskKind::Deployment => ("DeploymentWorkflow", DEPLOYMENT),
    };
    WorkflowTemplate { name, stages }
}

/// IntentClassifier → ChatAgent → END.
pub fn chat_workflow(registry: &AgentRegistry) -> DevMasterResult<OrchestrationGraph> {
    workflow_for_task(TaskKind::ConversationalChat, registry)
}

/// The classifier followed by the template stages for `kind`.
///
/// Every stage must be registered; see [`register_placeholder_stages`].
pub fn workflow_for_task(
    kind: TaskKind,
    registry: &AgentRegistry,
) -> DevMasterResult<OrchestrationGraph> {
    let template = workflow_template(kind);
    let mut builder = OrchestrationGraph::builder(template.name, IntentClassifierAgent::NAME);
    let mut from = IntentClassifierAgent::NAME;
    for &stage in template.stages {
        builder = builder.add_edge(from, stage);
        from = stage;
    }
    builder = builder.add_edge(from, END);
    debug!(workflow = template.name, stages = template.stages.len(), "Built workflow");
    builder.build(registry)
}

/// Register a [`HandoffAgent::placeholder`] for every stage of `kind`'s
/// template that has no agent yet. Returns the names it registered.
pub fn register_placeholder_stages(
    registry: &mut AgentRegistry,
    kind: TaskKind,
) -> DevMasterResult<Vec<&'static str>> {
    let mut added = Vec::new();
    for &stage in workflow_template(kind).stages {
        if !registry.contains(stage) {
            registry.register_agent(Arc::new(HandoffAgent::placeholder(stage)))?;
            added.push(stage);
        }
    }
    Ok(added)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::register_builtins;
    use devmaster_core::StateContainer;
    use uuid::Uuid;

    #[test]
    fn test_every_kind_has_stages() {
        for kind in [
            TaskKind::ConversationalChat,
            TaskKind::FullstackDevelopment,
            TaskKind::BackendOnly,
            TaskKind::FrontendOnly,
            TaskKind::CodeReview,
            TaskKind::Debugging,
            TaskKind::Documentation,
            TaskKind::Testing,
            TaskKind::Deployment,
        ] {
            assert!(!workflow_template(kind).stages.is_empty(), "{kind}");
        }
    }

    #[test]
    fn test_chat_workflow_edges() {
        let mut registry = AgentRegistry::new();
        register_builtins(&mut registry, None).unwrap();
        let graph = chat_workflow(&registry).unwrap();
        let state = StateContainer::new(Uuid::new_v4(), IntentClassifierAgent::NAME);
        assert_eq!(graph.entry(), IntentClassifierAgent::NAME);
        assert_eq!(
            graph.route(IntentClassifierAgent::NAME, &state).as_deref(),
            Some(ChatAgent::NAME)
        );
        assert_eq!(graph.route(ChatAgent::NAME, &state).as_deref(), Some(END));
    }

    #[test]
    fn test_unregistered_stage_is_rejected_until_placeholders_exist() {
        let mut registry = AgentRegistry::new();
        register_builtins(&mut registry, None).unwrap();
        assert!(workflow_for_task(TaskKind::Debugging, &registry).is_err());

        let added = register_placeholder_stages(&mut registry, TaskKind::Debugging).unwrap();
        assert_eq!(added, vec!["DebuggingAgent", "TestingAgent"]);
        assert!(register_placeholder_stages(&mut registry, TaskKind::Debugging)
            .unwrap()
            .is_empty());

        let graph = workflow_for_task(TaskKind::Debugging, &registry).unwrap();
        let state = StateContainer::new(Uuid::new_v4(), "x");
        assert_eq!(
            graph.route("DebuggingAgent", &state).as_deref(),
            Some("TestingAgent")
        );
        assert_eq!(graph.route("TestingAgent", &state).as_deref(), Some(END));
    }
}
