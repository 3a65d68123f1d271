use devmaster_core::{DevMasterError, DevMasterResult};
use serde::{Deserialize, Serialize};

/// Why an invocation failed, for fallback selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The agent returned an error or panicked.
    Execution,
    /// The invocation exceeded `agent_timeout_ms`.
    Timeout,
}

/// What happens to an in-flight invocation when its run is cancelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationPolicy {
    /// Let the agent finish and merge its result, then stop at the next step boundary.
    #[default]
    FinishInFlight,
    /// Abort the invocation and discard its result.
    Abandon,
}

/// Agents to hand control to once retries for a failure are exhausted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default)]
    pub execution: Option<String>,
    /// Falls back to `execution` when unset.
    #[serde(default)]
    pub timeout: Option<String>,
}

impl FallbackConfig {
    pub fn for_class(&self, class: FailureClass) -> Option<&str> {
        match class {
            FailureClass::Execution => self.execution.as_deref(),
            FailureClass::Timeout => self.timeout.as_deref().or(self.execution.as_deref()),
        }
    }
}

/// Engine-wide limits and policies, shared by every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum agent invocations (retries included) per run.
    #[serde(default = "default_step_budget")]
    pub step_budget: u32,
    /// A run fails once its `error_count` exceeds this.
    #[serde(default = "default_error_budget")]
    pub error_budget: u32,
    /// Per-invocation timeout. `None` disables it.
    #[serde(default = "default_agent_timeout_ms")]
    pub agent_timeout_ms: Option<u64>,
    #[serde(default)]
    pub cancellation: CancellationPolicy,
    /// Per-subscriber event buffer before the oldest events are dropped.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default)]
    pub fallbacks: FallbackConfig,
}

fn default_step_budget() -> u32 {
    50
}

fn default_error_budget() -> u32 {
    3
}

fn default_agent_timeout_ms() -> Option<u64> {
    Some(120_000)
}

fn default_event_buffer() -> usize {
    256
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            step_budget: default_step_budget(),
            error_budget: default_error_budget(),
            agent_timeout_ms: default_agent_timeout_ms(),
            cancellation: CancellationPolicy::default(),
            event_buffer: default_event_buffer(),
            fallbacks: FallbackConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> DevMasterResult<()> {
        if self.step_budget == 0 {
            return Err(DevMasterError::Config("step_budget must be at least 1".into()));
        }
        if self.event_buffer == 0 {
            return Err(DevMasterError::Config("event_buffer must be at least 1".into()));
        }
        if self.agent_timeout_ms == Some(0) {
            return Err(DevMasterError::Config(
                "agent_timeout_ms must be positive; omit it to disable timeouts".into(),
            ));
        }
        Ok(())
    }

    pub fn with_step_budget(mut self, budget: u32) -> Self {
        self.step_budget = budget;
        self
    }

    pub fn with_error_budget(mut self, budget: u32) -> Self {
        self.error_budget = budget;
        self
    }

    pub fn with_agent_timeout_ms(mut self, timeout: Option<u64>) -> Self {
        self.agent_timeout_ms = timeout;
        self
    }

    pub fn with_cancellation(mut self, policy: CancellationPolicy) -> Self {
        self.cancellation = policy;
        self
    }

    pub fn with_fallback(mut self, class: FailureClass, agent: impl Into<String>) -> Self {
        match class {
            FailureClass::Execution => self.fallbacks.execution = Some(agent.into()),
            FailureClass::Timeout => self.fallbacks.timeout = Some(agent.into()),
        }
        self
    }
}
