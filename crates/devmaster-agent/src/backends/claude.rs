use super::LlmBackend;
use crate::config::ModelConfig;
use crate::llm::LlmResponse;
use async_trait::async_trait;
use devmaster_core::{DevMasterError, DevMasterResult, Message, Role};
use serde::Serialize;

/// Claude (Anthropic) messages API backend.
pub struct ClaudeBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl ClaudeBackend {
    pub fn new(http: reqwest::Client, config: ModelConfig) -> Self {
        Self { config, http }
    }
}

/// Sent when the conversation would otherwise end on an assistant turn, which
/// the messages API reads as a prefill to continue.
const CLOSING_TURN: &str = "Please respond to the conversation above.";

#[derive(Debug, Serialize)]
struct ClaudeMessage {
    role: &'static str,
    content: String,
}

/// System messages travel in `system`; agent notes are assistant turns. The
/// result always ends on a user turn.
fn claude_messages(messages: &[Message]) -> Vec<ClaudeMessage> {
    let mut api_messages: Vec<ClaudeMessage> = messages
        .iter()
        .filter_map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant | Role::Agent => "assistant",
                Role::System => return None,
            };
            Some(ClaudeMessage {
                role,
                content: m.content.clone(),
            })
        })
        .collect();
    if api_messages.last().map_or(true, |m| m.role != "user") {
        api_messages.push(ClaudeMessage {
            role: "user",
            content: CLOSING_TURN.to_string(),
        });
    }
    api_messages
}

#[async_trait]
impl LlmBackend for ClaudeBackend {
    async fn complete(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
    ) -> DevMasterResult<LlmResponse> {
        let url = format!("{}/v1/messages", self.config.base_url());

        let api_messages = claude_messages(messages);

        let mut body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": api_messages,
        });

        if let Some(sys) = system_prompt {
            body["system"] = serde_json::json!(sys);
        }

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
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
                "Claude API error {status}: {resp_body}"
            )));
        }

        parse_claude_response(&resp_body)
    }
}

/// Extract the text blocks of a messages API response.
pub fn parse_claude_response(body: &serde_json::Value) -> DevMasterResult<LlmResponse> {
    let content = body["content"]
        .as_array()
        .ok_or_else(|| DevMasterError::Http("Missing content in Claude response".into()))?;

    let text_parts: Vec<&str> = content
        .iter()
        .filter(|block| block["type"].as_str() == Some("text"))
        .filter_map(|block| block["text"].as_str())
        .collect();

    Ok(LlmResponse {
        content: text_parts.join("\n"),
        stop_reason: body["stop_reason"].as_str().map(str::to_string),
    })
}
