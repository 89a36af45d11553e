pub mod json;
pub mod openrouter;

pub use openrouter::OpenRouterProvider;

use serde::{Deserialize, Serialize};
use threadscope_core::CoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Ask the provider to constrain the reply to a JSON object.
    pub json_mode: bool,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            json_mode: false,
        }
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    /// Content of the last user message.
    pub fn user_prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// A chat-completion backend. Implementations own pacing, timeouts and
/// transport-level retries; callers only see the final reply or error.
pub trait LlmProvider {
    async fn complete(&self, request: &ChatRequest) -> Result<String, CoreError>;

    fn name(&self) -> &str;
}

impl<P: LlmProvider + ?Sized> LlmProvider for &P {
    async fn complete(&self, request: &ChatRequest) -> Result<String, CoreError> {
        (**self).complete(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
