//! Core types and error definitions for the DevMaster orchestration engine.
//!
//! This crate provides the foundational types shared across all DevMaster
//! crates: the error taxonomy, conversation messages, the per-run
//! [`StateContainer`] and the [`StateDelta`] merge protocol.
//!
//! # Main types
//!
//! - [`DevMasterError`] — Unified error enum for the engine.
//! - [`DevMasterResult`] — Convenience alias for `Result<T, DevMasterError>`.
//! - [`Message`] / [`Role`] — Append-only conversation history entries.
//! - [`StateContainer`] — The record threaded through every agent invocation.
//! - [`StateDelta`] — Partial state returned by an agent, merged by the loop.

/// Partial state updates and the merge protocol.
pub mod delta;
/// Error types.
pub mod error;
/// Conversation messages.
pub mod message;
/// The per-run state container.
pub mod state;

pub use delta::{ArtifactOverwrite, MergeReport, StateDelta};
pub use error::{DevMasterError, DevMasterResult};
pub use message::{Message, Role};
pub use state::{
    AgentHistoryEntry, FailedAgentRecord, InitialState, RunStatus, StateContainer, TaskKind,
    ValidationResult, END,
};
