use crate::backends::claude::ClaudeBackend;
use crate::backends::mock::MockBackend;
use crate::backends::openai::OpenAiBackend;
use crate::backends::LlmBackend;
use crate::config::{LlmProvider, ModelConfig};
use devmaster_core::{DevMasterError, DevMasterResult, Message};
use std::time::Duration;

/// A completed model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmResponse {
    pub content: String,
    /// Provider stop/finish reason, when reported.
    pub stop_reason: Option<String>,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            stop_reason: None,
        }
    }
}

/// Client that dispatches to the configured provider backend.
pub struct LlmClient {
    backend: Box<dyn LlmBackend>,
}

impl LlmClient {
    pub fn new(config: ModelConfig) -> DevMasterResult<Self> {
        let backend: Box<dyn LlmBackend> = match config.provider {
            LlmProvider::Claude => Box::new(ClaudeBackend::new(http_client(&config)?, config)),
            LlmProvider::OpenAi => Box::new(OpenAiBackend::new(http_client(&config)?, config)),
            LlmProvider::Mock => Box::new(MockBackend::echo()),
        };
        Ok(Self { backend })
    }

    /// Create from a pre-built backend (for custom providers and tests).
    pub fn from_backend(backend: Box<dyn LlmBackend>) -> Self {
        Self { backend }
    }

    pub async fn complete(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
    ) -> DevMasterResult<LlmResponse> {
        self.backend.complete(system_prompt, messages).await
    }
}

fn http_client(config: &ModelConfig) -> DevMasterResult<reqwest::Client> {
    if config.api_key.is_empty() {
        return Err(DevMasterError::Config(format!(
            "{:?} provider requires an api_key",
            config.provider
        )));
    }
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| DevMasterError::Http(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_real_provider_requires_key() {
        let config = ModelConfig {
            provider: LlmProvider::Claude,
            ..ModelConfig::default()
        };
        let err = LlmClient::new(config).err().unwrap();
        assert!(matches!(err, DevMasterError::Config(_)));
    }

    #[tokio::test]
    async fn test_default_config_uses_mock() {
        let client = LlmClient::new(ModelConfig::default()).unwrap();
        let reply = client
            .complete(None, &[Message::user("ping")])
            .await
            .unwrap();
        assert_eq!(reply.content, "ping");
    }
}
