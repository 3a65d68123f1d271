use super::LlmBackend;
use crate::llm::LlmResponse;
use async_trait::async_trait;
use devmaster_core::{DevMasterResult, Message, Role};
use parking_lot::Mutex;

/// Deterministic offline backend.
///
/// In echo mode it replies with the content of the last non-system message.
/// In scripted mode it replays the given replies in order and keeps repeating
/// the final one. Every conversation it sees is recorded for inspection.
pub struct MockBackend {
    script: Vec<String>,
    cursor: Mutex<usize>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl MockBackend {
    pub fn echo() -> Self {
        Self::scripted(Vec::<String>::new())
    }

    pub fn scripted<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        Self {
            script: replies.into_iter().map(Into::into).collect(),
            cursor: Mutex::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Number of completions served so far.
    pub fn call_count(&self) -> usize {
        self.seen.lock().len()
    }

    /// Conversations received, oldest first.
    pub fn conversations(&self) -> Vec<Vec<Message>> {
        self.seen.lock().clone()
    }

    fn next_reply(&self, messages: &[Message]) -> String {
        if self.script.is_empty() {
            return messages
                .iter()
                .rev()
                .find(|m| m.role != Role::System)
                .map(|m| m.content.clone())
                .unwrap_or_default();
        }
        let mut cursor = self.cursor.lock();
        let idx = (*cursor).min(self.script.len() - 1);
        *cursor += 1;
        self.script[idx].clone()
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn complete(
        &self,
        _system_prompt: Option<&str>,
        messages: &[Message],
    ) -> DevMasterResult<LlmResponse> {
        self.seen.lock().push(messages.to_vec());
        Ok(LlmResponse {
            content: self.next_reply(messages),
            stop_reason: Some("end_turn".to_string()),
        })
    }
}
