use thiserror::Error;
use uuid::Uuid;

/// A convenience `Result` alias using [`DevMasterError`].
pub type DevMasterResult<T> = Result<T, DevMasterError>;

/// Top-level error type for the DevMaster engine.
///
/// Configuration errors (`UnknownAgent`, `DuplicateName`,
/// `RoutingConfiguration`) end a run immediately. `AgentExecution` is first
/// absorbed by retry and fallback policy. `StepBudgetExceeded` aborts the run.
#[derive(Error, Debug)]
pub enum DevMasterError {
    /// No agent with this name is registered.
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// An agent with this name is already registered.
    #[error("Agent already registered: {0}")]
    DuplicateName(String),

    /// An agent invocation failed (including timeouts and panics).
    #[error("Agent '{agent}' failed: {cause}")]
    AgentExecution {
        /// Name of the failing agent.
        agent: String,
        /// Human-readable cause.
        cause: String,
    },

    /// No routing edge matched the state after an agent finished.
    #[error("Routing error: {0}")]
    RoutingConfiguration(String),

    /// The run used up its step budget.
    #[error("Step budget of {budget} exhausted")]
    StepBudgetExceeded {
        /// The configured budget.
        budget: u32,
    },

    /// No run with this id is known.
    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    /// The run has left the `running` status and is read-only.
    #[error("Run {0} already finished")]
    RunFinished(Uuid),

    /// A state store failed to load or save a checkpoint.
    #[error("Store error: {0}")]
    Store(String),

    /// An outbound HTTP request (e.g. an LLM API call) failed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Invalid configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// An engine invariant broke (e.g. a run task ended without an outcome).
    #[error("Internal error: {0}")]
    Internal(String),

    /// A JSON serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DevMasterError {
    /// Shorthand for an [`DevMasterError::AgentExecution`] error.
    pub fn execution(agent: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::AgentExecution {
            agent: agent.into(),
            cause: cause.into(),
        }
    }

    /// Errors caused by how the engine was wired rather than by agent work.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownAgent(_)
                | Self::DuplicateName(_)
                | Self::RoutingConfiguration(_)
                | Self::Config(_)
        )
    }

    /// Errors the execution loop may absorb with retry or fallback.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::AgentExecution { .. } | Self::Http(_))
    }
}
