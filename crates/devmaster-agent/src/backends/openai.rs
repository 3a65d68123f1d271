use super::LlmBackend;
use crate::config::ModelConfig;
use crate::llm::LlmResponse;
use async_trait::async_trait;
use devmaster_core::{DevMasterError, DevMasterResult, Message, Role};

/// OpenAI-compatible chat completions backend.
///
/// Works with OpenAI and any provider exposing the same API shape.
pub struct OpenAiBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(http: reqwest::Client, config: ModelConfig) -> Self {
        Self { config, http }
    }

    fn build_messages(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
    ) -> Vec<serde_json::Value> {
        let mut api_messages: Vec<serde_json::Value> = Vec::new();

        if let Some(sys) = system_prompt {
            api_messages.push(serde_json::json!({
                "role": "system",
                "content": sys
            }));
        }

        for m in messages {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant | Role::Agent => "assistant",
                Role::System => continue,
            };
            api_messages.push(serde_json::json!({
                "role": role,
                "content": m.content
            }));
        }

        api_messages
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn complete(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
    ) -> DevMasterResult<LlmResponse> {
        let url = format!("{}/v1/chat/completions", self.config.base_url());

        let body = serde_json::json!({
            "model": self.config.model_id,
            "messages": self.build_messages(system_prompt, messages),
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        });

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DevMasterError::Http(e.to_string()))?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| DevMasterError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(DevMasterError::Http(format!(
                "OpenAI API error {status}: {resp_body}"
            )));
        }

        parse_openai_response(&resp_body)
    }
}

pub fn parse_openai_response(body: &serde_json::Value) -> DevMasterResult<LlmResponse> {
    let choice = &body["choices"][0];
    let content = choice["message"]["content"]
        .as_str()
        .ok_or_else(|| DevMasterError::Http("Missing message content in OpenAI response".into()))?;
    Ok(LlmResponse {
        content: content.to_string(),
        stop_reason: choice["finish_reason"].as_str().map(str::to_string),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_choice() {
        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "hi"}, "finish_reason": "stop"}]
        });
        let resp = parse_openai_response(&body).unwrap();
        assert_eq!(resp.content, "hi");
        assert_eq!(resp.stop_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_system_messages_dropped_and_agent_maps_to_assistant() {
        let backend = OpenAiBackend::new(reqwest::Client::new(), ModelConfig::default());
        let msgs = backend.build_messages(
            Some("be brief"),
            &[
                Message::user("q"),
                Message::system("internal"),
                Message::agent("Chat", "a"),
            ],
        );
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[1]["role"], "user");
        assert_eq!(msgs[2]["role"], "assistant");
    }
}
