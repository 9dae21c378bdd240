//! Chat-completion API providers
//!
//! Concrete implementations for OpenAI (and OpenAI-compatible), Anthropic,
//! and local models served behind an OpenAI-compatible route.

use super::*;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

// ============================================================================
// Configuration
// ============================================================================

/// LLM configuration loaded from environment or built explicitly.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Anthropic,
    Local,
    /// In-process providers (scripted fakes, tests).
    Custom,
}

impl LlmConfig {
    /// Load from environment variables.
    ///
    /// Precedence: `OPENAI_API_KEY`, then `ANTHROPIC_API_KEY`, then `LOCAL_LLM_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let timeout_secs = std::env::var("TEXT2SPARQL_LLM_TIMEOUT_SECS")
            .ok()
            .map(|s| {
                s.trim()
                    .parse::<u64>()
                    .map_err(|_| ConfigError::Invalid(format!("TEXT2SPARQL_LLM_TIMEOUT_SECS={s}")))
            })
            .transpose()?;

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            return Ok(Self {
                provider: Provider::OpenAI,
                api_key: key,
                model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4".to_string()),
                base_url: std::env::var("OPENAI_BASE_URL").ok(),
                timeout_secs: timeout_secs.unwrap_or(60),
            });
        }

        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            return Ok(Self {
                provider: Provider::Anthropic,
                api_key: key,
                model: std::env::var("ANTHROPIC_MODEL")
                    .unwrap_or_else(|_| "claude-3-5-sonnet-latest".to_string()),
                base_url: std::env::var("ANTHROPIC_BASE_URL").ok(),
                timeout_secs: timeout_secs.unwrap_or(60),
            });
        }

        if let Ok(url) = std::env::var("LOCAL_LLM_URL") {
            return Ok(Self {
                provider: Provider::Local,
                api_key: String::new(),
                model: std::env::var("LOCAL_LLM_MODEL").unwrap_or_else(|_| "default".to_string()),
                base_url: Some(url),
                timeout_secs: timeout_secs.unwrap_or(120),
            });
        }

        Err(ConfigError::NoProviderConfigured)
    }

    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::OpenAI,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
        }
    }

    pub fn anthropic(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::Anthropic,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
        }
    }

    pub fn local(url: &str, model: &str) -> Self {
        Self {
            provider: Provider::Local,
            api_key: String::new(),
            model: model.to_string(),
            base_url: Some(url.to_string()),
            timeout_secs: 120,
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = Some(url.trim_end_matches('/').to_string());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No LLM provider configured. Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or LOCAL_LLM_URL")]
    NoProviderConfigured,
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn build_http_client(timeout_secs: u64) -> Result<Client, LlmError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| LlmError::Client(e.to_string()))
}

fn openai_style_messages(messages: &[Message]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": m.role.as_str(),
                "content": m.content
            })
        })
        .collect()
}

fn openai_style_body(model: &str, request: &CompletionRequest) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": model,
        "messages": openai_style_messages(&request.messages),
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }
    if let Some(temp) = request.temperature {
        body["temperature"] = serde_json::json!(temp);
    }
    body
}

fn parse_openai_style_response(
    data: &serde_json::Value,
    model: &str,
) -> Result<CompletionResponse, LlmError> {
    let content = data["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message.content".to_string()))?
        .to_string();

    let finish_reason = match data["choices"][0]["finish_reason"].as_str() {
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    };

    Ok(CompletionResponse {
        content,
        finish_reason,
        usage: Usage {
            prompt_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as usize,
            completion_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0) as usize,
        },
        model: model.to_string(),
    })
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(60);
        return Err(LlmError::RateLimited {
            retry_after_ms: retry_after * 1000,
        });
    }
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(LlmError::Api(format!("HTTP {status}: {error_text}")));
    }
    Ok(response)
}

// ============================================================================
// OpenAI Provider
// ============================================================================

pub struct OpenAiClient {
    client: Client,
    config: LlmConfig,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = build_http_client(config.timeout_secs)?;
        Ok(Self { client, config })
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!(
            "{}/chat/completions",
            self.config
                .base_url
                .as_deref()
                .unwrap_or("https://api.openai.com/v1")
        );
        let body = openai_style_body(&self.config.model, request);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;
        let response = error_for_status(response).await?;

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        parse_openai_style_response(&data, &self.config.model)
    }
}

// ============================================================================
// Anthropic Provider
// ============================================================================

pub struct AnthropicClient {
    client: Client,
    config: LlmConfig,
}

impl AnthropicClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = build_http_client(config.timeout_secs)?;
        Ok(Self { client, config })
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!(
            "{}/v1/messages",
            self.config
                .base_url
                .as_deref()
                .unwrap_or("https://api.anthropic.com")
        );

        // System prompt travels out-of-band in the Messages API.
        let system = request.system_prompt().map(str::to_string);
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(1024),
        });
        if let Some(sys) = system {
            body["system"] = serde_json::json!(sys);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;
        let response = error_for_status(response).await?;

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = data["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .ok_or_else(|| LlmError::InvalidResponse("missing content blocks".to_string()))?;

        let finish_reason = match data["stop_reason"].as_str() {
            Some("max_tokens") => FinishReason::Length,
            _ => FinishReason::Stop,
        };

        Ok(CompletionResponse {
            content,
            finish_reason,
            usage: Usage {
                prompt_tokens: data["usage"]["input_tokens"].as_u64().unwrap_or(0) as usize,
                completion_tokens: data["usage"]["output_tokens"].as_u64().unwrap_or(0) as usize,
            },
            model: self.config.model.clone(),
        })
    }
}

// ============================================================================
// Local Provider (Ollama, vLLM, etc.)
// ============================================================================

pub struct LocalClient {
    client: Client,
    config: LlmConfig,
}

impl LocalClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = build_http_client(config.timeout_secs)?;
        Ok(Self { client, config })
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .ok_or_else(|| LlmError::Api("No base URL configured".to_string()))?;

        // OpenAI-compatible route (vLLM, Ollama, llama.cpp server).
        let url = format!("{}/v1/chat/completions", base_url.trim_end_matches('/'));
        let body = openai_style_body(&self.config.model, request);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;
        let response = error_for_status(response).await?;

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        parse_openai_style_response(&data, &self.config.model)
    }
}

// ============================================================================
// Unified Client
// ============================================================================

/// Unified LLM client that dispatches to the configured provider.
pub enum UnifiedClient {
    OpenAI(OpenAiClient),
    Anthropic(AnthropicClient),
    Local(LocalClient),
}

impl UnifiedClient {
    pub fn from_config(config: LlmConfig) -> Result<Self, LlmError> {
        Ok(match config.provider {
            Provider::OpenAI => Self::OpenAI(OpenAiClient::new(config)?),
            Provider::Anthropic => Self::Anthropic(AnthropicClient::new(config)?),
            Provider::Local => Self::Local(LocalClient::new(config)?),
            Provider::Custom => {
                return Err(LlmError::Client(
                    "custom providers are constructed directly, not from config".to_string(),
                ))
            }
        })
    }

    fn config(&self) -> &LlmConfig {
        match self {
            Self::OpenAI(c) => &c.config,
            Self::Anthropic(c) => &c.config,
            Self::Local(c) => &c.config,
        }
    }
}

#[async_trait]
impl LlmProvider for UnifiedClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(
            model = %self.config().model,
            messages = request.messages.len(),
            max_tokens = ?request.max_tokens,
            "llm completion request"
        );
        match self {
            Self::OpenAI(c) => c.complete(&request).await,
            Self::Anthropic(c) => c.complete(&request).await,
            Self::Local(c) => c.complete(&request).await,
        }
    }

    fn model_info(&self) -> ModelInfo {
        let config = self.config();
        ModelInfo {
            name: config.model.clone(),
            provider: config.provider,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
