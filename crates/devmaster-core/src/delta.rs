//! Partial state produced by one agent invocation and the protocol that
//! folds it into the canonical [`StateContainer`].

use crate::error::DevMasterResult;
use crate::message::Message;
use crate::state::{RunStatus, StateContainer, TaskKind, ValidationResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The changes one agent wants applied to the shared state.
///
/// `error_count` and `failed_agents` have no field here; only the execution
/// loop moves them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_kind: Option<TaskKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub validation_results: BTreeMap<String, ValidationResult>,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
}

impl StateDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_active_agent(mut self, name: impl Into<String>) -> Self {
        self.active_agent = Some(name.into());
        self
    }

    pub fn with_task_kind(mut self, kind: TaskKind) -> Self {
        self.task_kind = Some(kind);
        self
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_artifact(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.artifacts.insert(key.into(), value);
        self
    }

    pub fn with_validation(mut self, check: impl Into<String>, result: ValidationResult) -> Self {
        self.validation_results.insert(check.into(), result);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Names of the state fields this delta writes. Keyed maps contribute
    /// one `map.key` entry per key.
    pub fn updated_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if self.active_agent.is_some() {
            keys.push("active_agent".to_string());
        }
        if self.task_kind.is_some() {
            keys.push("task_kind".to_string());
        }
        if self.status.is_some() {
            keys.push("status".to_string());
        }
        if !self.messages.is_empty() {
            keys.push("messages".to_string());
        }
        keys.extend(self.artifacts.keys().map(|k| format!("artifacts.{k}")));
        keys.extend(
            self.validation_results
                .keys()
                .map(|k| format!("validation_results.{k}")),
        );
        keys.extend(self.context.keys().map(|k| format!("context.{k}")));
        keys
    }
}

/// An artifact key that was written again by a later delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactOverwrite {
    pub key: String,
    pub old: serde_json::Value,
    pub new: serde_json::Value,
}

/// What a merge changed, for event emission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    pub messages_appended: usize,
    pub artifacts_written: usize,
    pub overwritten: Vec<ArtifactOverwrite>,
    pub status_changed: Option<RunStatus>,
}

impl StateContainer {
    /// Merge a delta into this state.
    ///
    /// Scalars are last-write-wins, messages are appended in order, and the
    /// keyed maps merge key-wise. Every artifact key that already existed is
    /// reported in [`MergeReport::overwritten`]. Fails with
    /// [`DevMasterError::RunFinished`](crate::DevMasterError::RunFinished) once
    /// the run is terminal.
    pub fn merge(&mut self, delta: StateDelta) -> DevMasterResult<MergeReport> {
        self.ensure_running()?;
        let mut report = MergeReport::default();

        if let Some(agent) = delta.active_agent {
            self.active_agent = agent;
        }
        if let Some(kind) = delta.task_kind {
            self.task_kind = kind;
        }
        if let Some(status) = delta.status {
            if status != self.status() {
                report.status_changed = Some(status);
            }
            self.set_status(status);
        }

        report.messages_appended = delta.messages.len();
        self.messages.extend(delta.messages);

        report.artifacts_written = delta.artifacts.len();
        for (key, value) in delta.artifacts {
            if let Some(old) = self.artifacts.insert(key.clone(), value.clone()) {
                report.overwritten.push(ArtifactOverwrite { key, old, new: value });
            }
        }

        self.validation_results.extend(delta.validation_results);
        self.context.extend(delta.context);

        self.touch();
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::state::END;
    use serde_json::json;
    use uuid::Uuid;

    fn state() -> StateContainer {
        StateContainer::new(Uuid::new_v4(), "A")
    }

    #[test]
    fn test_scalars_last_write_wins() {
        let mut s = state();
        let delta = StateDelta::new()
            .with_active_agent("B")
            .with_task_kind(TaskKind::Debugging);
        s.merge(delta).unwrap();
        assert_eq!(s.active_agent, "B");
        assert_eq!(s.task_kind, TaskKind::Debugging);

        s.merge(StateDelta::new()).unwrap();
        assert_eq!(s.active_agent, "B", "absent scalar leaves value untouched");
    }

    #[test]
    fn test_messages_append_in_order() {
        let mut s = state();
        s.messages.push(Message::user("first"));
        let delta = StateDelta::new()
            .with_message(Message::agent("A", "second"))
            .with_message(Message::agent("A", "third"));
        let report = s.merge(delta).unwrap();
        assert_eq!(report.messages_appended, 2);
        let contents: Vec<_> = s.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["first", "second", "third"]);
    }

    #[test]
    fn test_artifact_collision_is_reported() {
        let mut s = state();
        s.merge(StateDelta::new().with_artifact("schema", json!("v1")))
            .unwrap();
        let report = s
            .merge(StateDelta::new().with_artifact("schema", json!("v2")))
            .unwrap();
        assert_eq!(s.artifacts["schema"], json!("v2"));
        assert_eq!(
            report.overwritten,
            vec![ArtifactOverwrite {
                key: "schema".into(),
                old: json!("v1"),
                new: json!("v2"),
            }]
        );
    }

    #[test]
    fn test_artifact_merge_is_idempotent() {
        let delta = StateDelta::new()
            .with_artifact("a", json!({"x": 1}))
            .with_artifact("b", json!([1, 2]));
        let mut once = state();
        once.merge(delta.clone()).unwrap();
        let mut twice = state();
        twice.merge(delta.clone()).unwrap();
        twice.merge(delta).unwrap();
        assert_eq!(once.artifacts, twice.artifacts);
    }

    #[test]
    fn test_validation_results_merge_keywise() {
        let mut s = state();
        s.merge(
            StateDelta::new()
                .with_validation("lint", ValidationResult::fail("unused import"))
                .with_validation("types", ValidationResult::pass()),
        )
        .unwrap();
        s.merge(StateDelta::new().with_validation("lint", ValidationResult::pass()))
            .unwrap();
        assert!(s.validation_results["lint"].passed);
        assert!(s.validation_results["types"].passed);
        assert_eq!(s.validation_results.len(), 2);
    }

    #[test]
    fn test_merge_into_terminal_state_is_rejected() {
        let mut s = state();
        s.finish(RunStatus::Completed);
        let err = s
            .merge(StateDelta::new().with_active_agent(END))
            .unwrap_err();
        assert!(matches!(err, crate::DevMasterError::RunFinished(_)));
    }

    #[test]
    fn test_status_change_reported() {
        let mut s = state();
        let report = s
            .merge(StateDelta::new().with_status(RunStatus::Failed))
            .unwrap();
        assert_eq!(report.status_changed, Some(RunStatus::Failed));
        assert_eq!(s.status(), RunStatus::Failed);
    }

    #[test]
    fn test_updated_keys_lists_written_fields() {
        let delta = StateDelta::new()
            .with_task_kind(TaskKind::Testing)
            .with_message(Message::agent("A", "hi"))
            .with_artifact("schema", json!(1))
            .with_context("classification", json!({}));
        assert_eq!(
            delta.updated_keys(),
            vec!["task_kind", "messages", "artifacts.schema", "context.classification"]
        );
        assert!(StateDelta::new().updated_keys().is_empty());
    }

    #[test]
    fn test_error_bookkeeping_untouched_by_merge() {
        let mut s = state();
        s.record_failure("A", 1, "boom").unwrap();
        s.merge(StateDelta::new().with_message(Message::agent("A", "ok")))
            .unwrap();
        assert_eq!(s.error_count() as usize, s.failed_agents().len());
    }
}
