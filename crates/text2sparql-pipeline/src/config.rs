//! Pipeline configuration.
//!
//! Defaults target the public DBpedia endpoint and Spotlight annotator.
//! Values can be overlaid from `TEXT2SPARQL_*` environment variables or read
//! from a JSON file; either way call [`PipelineConfig::validate`] before use.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What to do when the clarification (rewrite) step produces no text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationPolicy {
    /// Abort with a clarification failure.
    FailFast,
    /// Continue with the translated, un-rewritten question.
    #[default]
    FallBack,
}

impl std::str::FromStr for ClarificationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_fast" | "fail" => Ok(ClarificationPolicy::FailFast),
            "fall_back" | "fallback" => Ok(ClarificationPolicy::FallBack),
            other => Err(format!("unknown clarification policy `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeighborLimits {
    /// Entries kept from one entity's neighbor query.
    pub per_entity: usize,
    /// Neighbor URIs contributed to one generation prompt, across all entities.
    pub total: usize,
    /// `LIMIT` of the neighbor SELECT.
    pub query_limit: usize,
}

impl Default for NeighborLimits {
    fn default() -> Self {
        Self {
            per_entity: 10,
            total: 30,
            query_limit: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub endpoint_url: String,
    /// Prefix of knowledge-base resource URIs (`http://dbpedia.org/resource/`).
    pub resource_namespace: String,
    /// Annotation service base; `/annotate` is appended.
    pub annotation_url: String,
    pub annotation_confidence: f64,
    /// Fewer matched spans than this sends linking to the generative fallback.
    pub min_annotated_spans: usize,
    /// Bound applied to every external call.
    pub call_timeout_secs: u64,
    pub neighbors: NeighborLimits,
    pub top_k: usize,
    pub max_retries: usize,
    pub clarification_policy: ClarificationPolicy,
    pub max_concurrent_requests: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "https://dbpedia.org/sparql".to_string(),
            resource_namespace: "http://dbpedia.org/resource/".to_string(),
            annotation_url: "https://api.dbpedia-spotlight.org/en".to_string(),
            annotation_confidence: 0.5,
            min_annotated_spans: 2,
            call_timeout_secs: 30,
            neighbors: NeighborLimits::default(),
            top_k: 7,
            max_retries: 2,
            clarification_policy: ClarificationPolicy::default(),
            max_concurrent_requests: 8,
        }
    }
}

fn config_err(msg: impl Into<String>) -> PipelineError {
    PipelineError::Config(msg.into())
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, PipelineError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| config_err(format!("{key}={raw:?}: {e}")))
}

impl PipelineConfig {
    /// Defaults overlaid with `TEXT2SPARQL_*` environment variables.
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = lookup("TEXT2SPARQL_ENDPOINT_URL") {
            cfg.endpoint_url = v;
        }
        if let Some(v) = lookup("TEXT2SPARQL_RESOURCE_NAMESPACE") {
            cfg.resource_namespace = v;
        }
        if let Some(v) = lookup("TEXT2SPARQL_ANNOTATION_URL") {
            cfg.annotation_url = v;
        }
        if let Some(v) = lookup("TEXT2SPARQL_ANNOTATION_CONFIDENCE") {
            cfg.annotation_confidence = parse_var("TEXT2SPARQL_ANNOTATION_CONFIDENCE", &v)?;
        }
        if let Some(v) = lookup("TEXT2SPARQL_MIN_ANNOTATED_SPANS") {
            cfg.min_annotated_spans = parse_var("TEXT2SPARQL_MIN_ANNOTATED_SPANS", &v)?;
        }
        if let Some(v) = lookup("TEXT2SPARQL_CALL_TIMEOUT_SECS") {
            cfg.call_timeout_secs = parse_var("TEXT2SPARQL_CALL_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("TEXT2SPARQL_TOP_K") {
            cfg.top_k = parse_var("TEXT2SPARQL_TOP_K", &v)?;
        }
        if let Some(v) = lookup("TEXT2SPARQL_MAX_RETRIES") {
            cfg.max_retries = parse_var("TEXT2SPARQL_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("TEXT2SPARQL_CLARIFICATION_POLICY") {
            cfg.clarification_policy = parse_var("TEXT2SPARQL_CLARIFICATION_POLICY", &v)?;
        }
        if let Some(v) = lookup("TEXT2SPARQL_MAX_CONCURRENT_REQUESTS") {
            cfg.max_concurrent_requests = parse_var("TEXT2SPARQL_MAX_CONCURRENT_REQUESTS", &v)?;
        }
        Ok(cfg)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| config_err(format!("failed to read {}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| config_err(format!("failed to parse {}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        for (name, value) in [
            ("endpoint_url", &self.endpoint_url),
            ("resource_namespace", &self.resource_namespace),
            ("annotation_url", &self.annotation_url),
        ] {
            url::Url::parse(value).map_err(|e| config_err(format!("{name} {value:?}: {e}")))?;
        }
        if !(0.0..=1.0).contains(&self.annotation_confidence) {
            return Err(config_err(format!(
                "annotation_confidence must be within [0, 1], got {}",
                self.annotation_confidence
            )));
        }
        if self.call_timeout_secs == 0 {
            return Err(config_err("call_timeout_secs must be positive"));
        }
        if self.max_concurrent_requests == 0 {
            return Err(config_err("max_concurrent_requests must be positive"));
        }
        if self.neighbors.per_entity == 0 || self.neighbors.query_limit == 0 {
            return Err(config_err("neighbor limits must be positive"));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}
