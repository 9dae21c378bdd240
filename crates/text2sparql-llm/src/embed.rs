//! Text embedding backends.
//!
//! Three backends, selectable at runtime:
//! - Deterministic token-hash embeddings (no network; stable across runs).
//! - OpenAI `/embeddings`.
//! - Ollama `/api/embed` (batched), falling back to `/api/embeddings` (per item).
//!
//! Vectors are returned exactly as the backend produced them. Any
//! normalization is the caller's decision and happens once, at index build.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts; output is aligned with the input.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Backend identifier recorded alongside persisted vectors.
    fn backend(&self) -> &str;

    fn model(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("embedding backend unreachable: {0}")]
    Network(String),
    #[error("embedding backend error: {0}")]
    Api(String),
    #[error("embedding backend returned invalid data: {0}")]
    InvalidResponse(String),
    #[error("HTTP client error: {0}")]
    Client(String),
    #[error("invalid embedding configuration: {0}")]
    Config(String),
}

// ============================================================================
// Deterministic token-hash embeddings
// ============================================================================

pub const TOKEN_HASH_DEFAULT_DIM: usize = 256;

/// Feature-hashing embedder: each lowercase alphanumeric token adds ±1 to one
/// bucket. Identical texts map to identical vectors.
#[derive(Debug, Clone)]
pub struct TokenHashEmbedder {
    dim: usize,
    model: String,
}

impl Default for TokenHashEmbedder {
    fn default() -> Self {
        Self::new(TOKEN_HASH_DEFAULT_DIM)
    }
}

impl TokenHashEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self {
            dim,
            model: format!("fnv1a64-{dim}"),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        for token in tokenize(text) {
            let h = fnv1a64(&token);
            let idx = (h % (self.dim as u64)) as usize;
            let sign = if ((h >> 32) & 1) == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        v
    }
}

fn fnv1a64(s: &str) -> u64 {
    let mut h: u64 = 14695981039346656037;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(1099511628211);
    }
    h
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

#[async_trait]
impl Embedder for TokenHashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn backend(&self) -> &str {
        "token-hash"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// OpenAI embeddings
// ============================================================================

pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiEmbedder {
    pub fn new(
        api_key: &str,
        model: &str,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, EmbedError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbedError::Client(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmbedError::Api(format!("HTTP {status}: {error_text}")));
        }

        #[derive(Deserialize)]
        struct Item {
            index: usize,
            embedding: Vec<f32>,
        }
        #[derive(Deserialize)]
        struct Resp {
            data: Vec<Item>,
        }

        let mut resp: Resp = response
            .json()
            .await
            .map_err(|e| EmbedError::InvalidResponse(e.to_string()))?;
        if resp.data.len() != texts.len() {
            return Err(EmbedError::InvalidResponse(format!(
                "{} embeddings for {} inputs",
                resp.data.len(),
                texts.len()
            )));
        }
        resp.data.sort_by_key(|item| item.index);
        Ok(resp.data.into_iter().map(|item| item.embedding).collect())
    }

    fn backend(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Ollama embeddings
// ============================================================================

pub struct OllamaEmbedder {
    client: Client,
    host: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(host: &str, model: &str, timeout: Duration) -> Result<Self, EmbedError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbedError::Client(e.to_string()))?;
        Ok(Self {
            client,
            host: normalize_ollama_host(host),
            model: model.to_string(),
        })
    }
}

fn normalize_ollama_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // Newer batched endpoint first.
        let url_embed = format!("{}/api/embed", self.host);
        let body_embed = serde_json::json!({
            "model": self.model,
            "input": texts,
            "truncate": true
        });

        let resp = self
            .client
            .post(&url_embed)
            .json(&body_embed)
            .send()
            .await
            .map_err(|e| EmbedError::Network(format!("{url_embed}: {e}")))?;

        if resp.status().is_success() {
            #[derive(Deserialize)]
            struct EmbedResp {
                embeddings: Vec<Vec<f32>>,
            }
            let out: EmbedResp = resp
                .json()
                .await
                .map_err(|e| EmbedError::InvalidResponse(format!("/api/embed: {e}")))?;
            if out.embeddings.len() != texts.len() {
                return Err(EmbedError::InvalidResponse(format!(
                    "/api/embed returned {} embeddings for {} inputs",
                    out.embeddings.len(),
                    texts.len()
                )));
            }
            return Ok(out.embeddings);
        }
        debug!(status = %resp.status(), "ollama /api/embed unavailable, using /api/embeddings");

        // Older per-item endpoint.
        let url = format!("{}/api/embeddings", self.host);
        #[derive(Deserialize)]
        struct EmbeddingsResp {
            embedding: Vec<f32>,
        }

        let mut out: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        for t in texts {
            let body = serde_json::json!({
                "model": self.model,
                "prompt": t
            });
            let resp = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| EmbedError::Network(format!("{url}: {e}")))?;
            if !resp.status().is_success() {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                return Err(EmbedError::Api(format!("ollama http error {status}: {text}")));
            }
            let r: EmbeddingsResp = resp
                .json()
                .await
                .map_err(|e| EmbedError::InvalidResponse(format!("/api/embeddings: {e}")))?;
            out.push(r.embedding);
        }
        Ok(out)
    }

    fn backend(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedBackend {
    TokenHash { dim: usize },
    OpenAI { api_key: String, model: String, base_url: Option<String> },
    Ollama { host: String, model: String },
}

#[derive(Debug, Clone)]
pub struct EmbedConfig {
    pub backend: EmbedBackend,
    pub timeout_secs: u64,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            backend: EmbedBackend::TokenHash {
                dim: TOKEN_HASH_DEFAULT_DIM,
            },
            timeout_secs: 30,
        }
    }
}

impl EmbedConfig {
    /// `TEXT2SPARQL_EMBED_BACKEND` = `token-hash` (default) | `openai` | `ollama`.
    pub fn from_env() -> Result<Self, EmbedError> {
        let backend = std::env::var("TEXT2SPARQL_EMBED_BACKEND")
            .unwrap_or_else(|_| "token-hash".to_string());
        let timeout_secs = match std::env::var("TEXT2SPARQL_EMBED_TIMEOUT_SECS") {
            Ok(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| EmbedError::Config(format!("TEXT2SPARQL_EMBED_TIMEOUT_SECS={s}")))?,
            Err(_) => 30,
        };

        let backend = match backend.trim().to_ascii_lowercase().as_str() {
            "token-hash" | "token_hash" | "hash" => {
                let dim = match std::env::var("TEXT2SPARQL_EMBED_DIM") {
                    Ok(s) => s
                        .trim()
                        .parse::<usize>()
                        .map_err(|_| EmbedError::Config(format!("TEXT2SPARQL_EMBED_DIM={s}")))?,
                    Err(_) => TOKEN_HASH_DEFAULT_DIM,
                };
                EmbedBackend::TokenHash { dim }
            }
            "openai" => EmbedBackend::OpenAI {
                api_key: std::env::var("OPENAI_API_KEY").map_err(|_| {
                    EmbedError::Config("openai embeddings require OPENAI_API_KEY".to_string())
                })?,
                model: std::env::var("TEXT2SPARQL_EMBED_MODEL")
                    .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
                base_url: std::env::var("OPENAI_BASE_URL").ok(),
            },
            "ollama" => EmbedBackend::Ollama {
                host: std::env::var("OLLAMA_HOST")
                    .unwrap_or_else(|_| "http://127.0.0.1:11434".to_string()),
                model: std::env::var("TEXT2SPARQL_EMBED_MODEL")
                    .unwrap_or_else(|_| "all-minilm".to_string()),
            },
            other => {
                return Err(EmbedError::Config(format!(
                    "unknown embedding backend `{other}` (expected token-hash, openai, ollama)"
                )))
            }
        };

        Ok(Self {
            backend,
            timeout_secs,
        })
    }

    pub fn build(&self) -> Result<Arc<dyn Embedder>, EmbedError> {
        let timeout = Duration::from_secs(self.timeout_secs);
        Ok(match &self.backend {
            EmbedBackend::TokenHash { dim } => Arc::new(TokenHashEmbedder::new(*dim)),
            EmbedBackend::OpenAI {
                api_key,
                model,
                base_url,
            } => Arc::new(OpenAiEmbedder::new(api_key, model, base_url.as_deref(), timeout)?),
            EmbedBackend::Ollama { host, model } => {
                Arc::new(OllamaEmbedder::new(host, model, timeout)?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_hash_is_deterministic() {
        let e = TokenHashEmbedder::new(64);
        let a = e.embed_text("What is the population of Paris?");
        let b = e.embed_text("what is the POPULATION of paris");
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
    }

    #[test]
    fn token_hash_differs_for_different_text() {
        let e = TokenHashEmbedder::default();
        assert_ne!(
            e.embed_text("rivers in Germany"),
            e.embed_text("films by Christopher Nolan")
        );
    }

    #[test]
    fn ollama_host_gets_scheme() {
        assert_eq!(normalize_ollama_host("localhost:11434/"), "http://localhost:11434");
        assert_eq!(
            normalize_ollama_host("https://ollama.example"),
            "https://ollama.example"
        );
    }

    #[test]
    fn default_config_is_offline() {
        let config = EmbedConfig::default();
        assert!(matches!(config.backend, EmbedBackend::TokenHash { .. }));
        let embedder = config.build().unwrap();
        assert_eq!(embedder.backend(), "token-hash");
    }
}
