pub mod claude;
pub mod mock;
pub mod openai;

use crate::llm::LlmResponse;
use async_trait::async_trait;
use devmaster_core::{DevMasterResult, Message};

/// Trait for language-model provider backends.
///
/// Each provider implements this trait to handle its own API framing.
///
/// To add a new provider:
/// 1. Create a new module in `backends/`
/// 2. Implement `LlmBackend` for your struct
/// 3. Add the variant to `LlmProvider` in `config.rs`
/// 4. Wire it up in `LlmClient::new()` in `llm.rs`
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Non-streaming completion over a conversation.
    async fn complete(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
    ) -> DevMasterResult<LlmResponse>;
}
