use crate::error::{DevMasterError, DevMasterResult};
use crate::message::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Reserved agent name that marks the end of a workflow.
pub const END: &str = "END";

/// Classification of the overall job a run is working on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    #[default]
    ConversationalChat,
    FullstackDevelopment,
    BackendOnly,
    FrontendOnly,
    CodeReview,
    Debugging,
    Documentation,
    Testing,
    Deployment,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskKind::ConversationalChat => "conversational_chat",
            TaskKind::FullstackDevelopment => "fullstack_development",
            TaskKind::BackendOnly => "backend_only",
            TaskKind::FrontendOnly => "frontend_only",
            TaskKind::CodeReview => "code_review",
            TaskKind::Debugging => "debugging",
            TaskKind::Documentation => "documentation",
            TaskKind::Testing => "testing",
            TaskKind::Deployment => "deployment",
        };
        f.write_str(s)
    }
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Running,
    Completed,
    Failed,
    Aborted,
}

impl RunStatus {
    /// Every status except `Running` is terminal.
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Outcome of a single named validation check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl ValidationResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            detail: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            checked_at: Utc::now(),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: None,
            errors: vec![error.into()],
            warnings: Vec::new(),
            checked_at: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// One failed agent invocation, as recorded by the execution loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedAgentRecord {
    pub agent_name: String,
    /// 1-based attempt number within the current visit to this agent.
    pub attempt: u32,
    pub error_summary: String,
    pub timestamp: DateTime<Utc>,
}

/// One successful agent invocation, as recorded by the execution loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHistoryEntry {
    pub agent_name: String,
    /// 1-based attempt number that succeeded.
    pub attempt: u32,
    /// Step of the drive that produced it, matching `AgentStarted.step`.
    pub step: u32,
    /// Fields the agent's delta wrote, see [`StateDelta::updated_keys`](crate::StateDelta::updated_keys).
    pub updated_keys: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Caller-supplied fields for a new run. Everything else gets engine defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitialState {
    #[serde(default)]
    pub user_request: String,
    #[serde(default)]
    pub task_kind: Option<TaskKind>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
}

impl InitialState {
    pub fn new(user_request: impl Into<String>) -> Self {
        Self {
            user_request: user_request.into(),
            ..Self::default()
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_task_kind(mut self, kind: TaskKind) -> Self {
        self.task_kind = Some(kind);
        self
    }
}

/// The record threaded through every agent invocation of a run.
///
/// Only the execution loop writes to the canonical container: agents see a
/// cloned snapshot and return a [`StateDelta`](crate::StateDelta). The
/// failure bookkeeping (`error_count`, `failed_agents`) is private and can only
/// move through [`StateContainer::record_failure`], which keeps the two in step.
/// `agent_history` is append-only through [`StateContainer::record_completion`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateContainer {
    pub run_id: Uuid,
    pub user_request: String,
    pub task_kind: TaskKind,
    pub active_agent: String,
    pub messages: Vec<Message>,
    pub artifacts: BTreeMap<String, serde_json::Value>,
    pub validation_results: BTreeMap<String, ValidationResult>,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    error_count: u32,
    failed_agents: Vec<FailedAgentRecord>,
    #[serde(default)]
    agent_history: Vec<AgentHistoryEntry>,
    status: RunStatus,
    /// Sequence number of the last event emitted for this run.
    #[serde(default)]
    pub event_sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StateContainer {
    /// A fresh running state positioned at `entry_agent`.
    pub fn new(run_id: Uuid, entry_agent: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            user_request: String::new(),
            task_kind: TaskKind::default(),
            active_agent: entry_agent.into(),
            messages: Vec::new(),
            artifacts: BTreeMap::new(),
            validation_results: BTreeMap::new(),
            context: BTreeMap::new(),
            error_count: 0,
            failed_agents: Vec::new(),
            agent_history: Vec::new(),
            status: RunStatus::Running,
            event_sequence: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build the initial state of a run from caller-supplied fields.
    pub fn from_initial(run_id: Uuid, entry_agent: impl Into<String>, initial: InitialState) -> Self {
        let mut state = Self::new(run_id, entry_agent);
        state.user_request = initial.user_request;
        state.task_kind = initial.task_kind.unwrap_or_default();
        state.messages = initial.messages;
        state.artifacts = initial.artifacts;
        state.context = initial.context;
        state
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn failed_agents(&self) -> &[FailedAgentRecord] {
        &self.failed_agents
    }

    /// Successful invocations in the order they happened.
    pub fn agent_history(&self) -> &[AgentHistoryEntry] {
        &self.agent_history
    }

    /// Whether the next agent is the terminal sentinel.
    pub fn at_end(&self) -> bool {
        self.active_agent == END
    }

    /// Record a failed invocation. Bumps `error_count` and appends to
    /// `failed_agents` together.
    pub fn record_failure(
        &mut self,
        agent_name: impl Into<String>,
        attempt: u32,
        error_summary: impl Into<String>,
    ) -> DevMasterResult<&FailedAgentRecord> {
        self.ensure_running()?;
        self.failed_agents.push(FailedAgentRecord {
            agent_name: agent_name.into(),
            attempt,
            error_summary: error_summary.into(),
            timestamp: Utc::now(),
        });
        self.error_count += 1;
        self.touch();
        Ok(&self.failed_agents[self.failed_agents.len() - 1])
    }

    /// Append a successful invocation to `agent_history`.
    pub fn record_completion(
        &mut self,
        agent_name: impl Into<String>,
        attempt: u32,
        step: u32,
        updated_keys: Vec<String>,
    ) -> DevMasterResult<&AgentHistoryEntry> {
        self.ensure_running()?;
        self.agent_history.push(AgentHistoryEntry {
            agent_name: agent_name.into(),
            attempt,
            step,
            updated_keys,
            timestamp: Utc::now(),
        });
        self.touch();
        Ok(&self.agent_history[self.agent_history.len() - 1])
    }

    /// Move the run into a terminal status. Returns `false` (and changes
    /// nothing) if the run already left `Running`.
    pub fn finish(&mut self, status: RunStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.touch();
        true
    }

    /// Point the run at its next agent.
    pub fn set_active_agent(&mut self, name: impl Into<String>) -> DevMasterResult<()> {
        self.ensure_running()?;
        self.active_agent = name.into();
        self.touch();
        Ok(())
    }

    pub(crate) fn set_status(&mut self, status: RunStatus) {
        self.status = status;
    }

    pub(crate) fn ensure_running(&self) -> DevMasterResult<()> {
        if self.status.is_terminal() {
            return Err(DevMasterError::RunFinished(self.run_id));
        }
        Ok(())
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_defaults() {
        let state = StateContainer::new(Uuid::new_v4(), "Echo");
        assert_eq!(state.active_agent, "Echo");
        assert_eq!(state.status(), RunStatus::Running);
        assert_eq!(state.error_count(), 0);
        assert!(state.failed_agents().is_empty());
        assert_eq!(state.task_kind, TaskKind::ConversationalChat);
    }

    #[test]
    fn test_from_initial_copies_fields() {
        let initial = InitialState::new("build a todo app")
            .with_task_kind(TaskKind::FullstackDevelopment)
            .with_context("message", serde_json::json!("hi"));
        let state = StateContainer::from_initial(Uuid::new_v4(), "IntentClassifier", initial);
        assert_eq!(state.user_request, "build a todo app");
        assert_eq!(state.task_kind, TaskKind::FullstackDevelopment);
        assert_eq!(state.context["message"], "hi");
    }

    #[test]
    fn test_record_failure_keeps_count_in_step() {
        let mut state = StateContainer::new(Uuid::new_v4(), "Flaky");
        state.record_failure("Flaky", 1, "boom").unwrap();
        state.record_failure("Flaky", 2, "boom again").unwrap();
        assert_eq!(state.error_count(), 2);
        assert_eq!(state.failed_agents().len(), 2);
        assert_eq!(state.failed_agents()[1].attempt, 2);
    }

    #[test]
    fn test_record_completion_appends_history() {
        let mut state = StateContainer::new(Uuid::new_v4(), "A");
        state
            .record_completion("A", 1, 1, vec!["messages".into()])
            .unwrap();
        let entry = state
            .record_completion("B", 2, 3, vec!["artifacts.plan".into()])
            .unwrap();
        assert_eq!(entry.agent_name, "B");

        let agents: Vec<_> = state
            .agent_history()
            .iter()
            .map(|e| (e.agent_name.as_str(), e.attempt, e.step))
            .collect();
        assert_eq!(agents, [("A", 1, 1), ("B", 2, 3)]);

        state.finish(RunStatus::Completed);
        assert!(state.record_completion("C", 1, 4, Vec::new()).is_err());
        assert_eq!(state.agent_history().len(), 2);
    }

    #[test]
    fn test_history_defaults_when_missing_from_checkpoint() {
        let state = StateContainer::new(Uuid::new_v4(), "A");
        let mut json = serde_json::to_value(&state).unwrap();
        json.as_object_mut().unwrap().remove("agent_history");
        let parsed: StateContainer = serde_json::from_value(json).unwrap();
        assert!(parsed.agent_history().is_empty());
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let mut state = StateContainer::new(Uuid::new_v4(), "A");
        assert!(state.finish(RunStatus::Completed));
        assert!(!state.finish(RunStatus::Failed));
        assert_eq!(state.status(), RunStatus::Completed);
        assert!(state.record_failure("A", 1, "late").is_err());
        assert!(state.set_active_agent("B").is_err());
    }

    #[test]
    fn test_finish_rejects_running() {
        let mut state = StateContainer::new(Uuid::new_v4(), "A");
        assert!(!state.finish(RunStatus::Running));
        assert!(state.is_running());
    }

    #[test]
    fn test_state_serialization_keeps_private_fields() {
        let mut state = StateContainer::new(Uuid::new_v4(), "A");
        state.record_failure("A", 1, "oops").unwrap();
        let json = serde_json::to_string(&state).unwrap();
        let parsed: StateContainer = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.error_count(), 1);
        assert_eq!(parsed.failed_agents()[0].error_summary, "oops");
        assert_eq!(parsed, state);
    }

    #[test]
    fn test_task_kind_display() {
        assert_eq!(TaskKind::CodeReview.to_string(), "code_review");
        assert_eq!(RunStatus::Aborted.to_string(), "aborted");
    }
}
