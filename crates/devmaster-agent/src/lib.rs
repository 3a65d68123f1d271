//! Agent capability contract and supporting pieces for DevMaster.
//!
//! # Main types
//!
//! - [`Agent`] — Trait every orchestrated unit of work implements.
//! - [`AgentRegistry`] — Name → factory mapping resolved by the execution loop.
//! - [`RetryPolicy`] — Bounded retry with fixed or exponential backoff.
//! - [`LlmClient`] — Pluggable language-model provider (Claude, OpenAI, mock).

pub mod agent;
pub mod backends;
pub mod config;
pub mod llm;
pub mod registry;
pub mod retry;

pub use agent::{Agent, AgentDescriptor, AgentOutput};
pub use backends::mock::MockBackend;
pub use backends::LlmBackend;
pub use config::{LlmProvider, ModelConfig};
pub use llm::{LlmClient, LlmResponse};
pub use registry::{AgentFactory, AgentRegistry};
pub use retry::{Backoff, RetryPolicy};
