//! Generative completion and embedding providers.
//!
//! The pipeline only ever talks to the two traits defined here:
//!
//! - [`LlmProvider`]: role-tagged message list + temperature + max-token
//!   budget → generated text.
//! - [`embed::Embedder`]: batch of texts → fixed-dimension vectors.
//!
//! Concrete HTTP clients live in [`providers`] (chat completion) and
//! [`embed`] (embeddings). Credentials are passed in through [`LlmConfig`]
//! values; nothing in this crate reads global state after construction.

pub mod embed;
pub mod providers;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use embed::{EmbedConfig, EmbedError, Embedder, TokenHashEmbedder};
pub use providers::{ConfigError, LlmConfig, Provider, UnifiedClient};

// ============================================================================
// Provider interface
// ============================================================================

/// Trait for chat-completion providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for the given request.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    fn model_info(&self) -> ModelInfo;
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            max_tokens: None,
            temperature: None,
        }
    }

    /// System + user pair, the shape every pipeline call uses.
    pub fn system_user(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self::new(vec![Message::system(system), Message::user(user)])
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Content of the first system message, if any.
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// Content of the last user message, if any.
    pub fn user_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub model: String,
}

impl CompletionResponse {
    /// Plain response with no usage accounting (used by scripted providers).
    pub fn text(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
            model: model.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
}

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub provider: Provider,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP client error: {0}")]
    Client(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_user_request_exposes_both_prompts() {
        let req = CompletionRequest::system_user("be terse", "hello")
            .temperature(0.1)
            .max_tokens(500);
        assert_eq!(req.system_prompt(), Some("be terse"));
        assert_eq!(req.user_prompt(), Some("hello"));
        assert_eq!(req.temperature, Some(0.1));
        assert_eq!(req.max_tokens, Some(500));
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::assistant("x")).unwrap();
        assert!(json.contains("\"assistant\""), "{json}");
    }
}
