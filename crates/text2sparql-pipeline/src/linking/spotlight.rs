//! Annotation-service linking (DBpedia Spotlight compatible).

use super::{EntityMention, LinkAttempt, LinkStrategy, LinkedQuestion};
use crate::error::AnnotationError;
use crate::parsing::UNTYPED_ENTITY;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One candidate returned by the annotation service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Annotation {
    #[serde(rename = "@URI")]
    pub uri: String,
    #[serde(rename = "@surfaceForm", deserialize_with = "lenient_string")]
    pub surface_form: String,
    /// Character offset of the surface form in the annotated text.
    #[serde(rename = "@offset", deserialize_with = "lenient_usize")]
    pub offset: usize,
    /// Comma-separated type tags, e.g. `Wikidata:Q515,DBpedia:City`.
    #[serde(rename = "@types", default)]
    pub types: String,
}

impl Annotation {
    /// Local name of the first type tag, [`UNTYPED_ENTITY`] when there is none.
    pub fn entity_type(&self) -> String {
        self.types
            .split(',')
            .next()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| t.rsplit(':').next().unwrap_or(t).to_string())
            .unwrap_or_else(|| UNTYPED_ENTITY.to_string())
    }
}

// Spotlight serializes every attribute as a JSON string, numbers included.
fn lenient_usize<'de, D: Deserializer<'de>>(d: D) -> Result<usize, D::Error> {
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::Number(n) => n
            .as_u64()
            .map(|v| v as usize)
            .ok_or_else(|| serde::de::Error::custom("offset is not a non-negative integer")),
        serde_json::Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!("unexpected offset {other}"))),
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(rename = "Resources", default)]
    resources: Option<Vec<Annotation>>,
}

#[async_trait]
pub trait AnnotationService: Send + Sync {
    async fn annotate(&self, text: &str, confidence: f64) -> Result<Vec<Annotation>, AnnotationError>;
}

/// HTTP client for a Spotlight `/annotate` endpoint.
#[derive(Debug, Clone)]
pub struct SpotlightClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl SpotlightClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AnnotationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnnotationError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    async fn send(&self, text: &str, confidence: f64) -> Result<Vec<Annotation>, AnnotationError> {
        let url = format!("{}/annotate", self.base_url);
        let confidence = confidence.to_string();
        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .form(&[("text", text), ("confidence", confidence.as_str())])
            .send()
            .await
            .map_err(|e| AnnotationError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AnnotationError::Status(response.status().as_u16()));
        }
        let body: AnnotateResponse = response
            .json()
            .await
            .map_err(|e| AnnotationError::InvalidResponse(e.to_string()))?;
        Ok(body.resources.unwrap_or_default())
    }
}

#[async_trait]
impl AnnotationService for SpotlightClient {
    async fn annotate(&self, text: &str, confidence: f64) -> Result<Vec<Annotation>, AnnotationError> {
        match tokio::time::timeout(self.timeout, self.send(text, confidence)).await {
            Ok(result) => result,
            Err(_) => Err(AnnotationError::Timeout(self.timeout.as_secs())),
        }
    }
}

/// Tagged question reconstructed from annotation candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tagging {
    pub tagged_question: String,
    pub uri_bindings: BTreeMap<String, String>,
    pub mentions: Vec<EntityMention>,
}

struct Span {
    start: usize,
    end: usize,
    surface: String,
    entity_type: String,
}

/// Wrap annotated surface forms in `<…>`.
///
/// Candidates are matched against a scratch copy of the question from the
/// highest offset down. A matched span is masked in place (same byte length)
/// so earlier offsets stay valid. Candidates whose text is no longer present
/// unmasked, e.g. because they overlap an accepted span, are dropped. The
/// accepted spans are then emitted in ascending offset order.
pub fn tag_question(question: &str, annotations: &[Annotation]) -> Tagging {
    let mut order: Vec<&Annotation> = annotations.iter().collect();
    order.sort_by(|a, b| b.offset.cmp(&a.offset));

    let mut scratch = question.to_string();
    let mut spans: Vec<Span> = Vec::new();
    let mut uri_bindings = BTreeMap::new();

    for ann in order {
        let surface = ann.surface_form.as_str();
        if surface.is_empty() {
            continue;
        }
        let at_offset = char_to_byte(question, ann.offset)
            .filter(|&b| scratch.get(b..).is_some_and(|rest| rest.starts_with(surface)));
        let Some(start) = at_offset.or_else(|| scratch.find(surface)) else {
            debug!(surface, offset = ann.offset, "annotation not found in question, skipping");
            continue;
        };
        let end = start + surface.len();
        scratch.replace_range(start..end, &"\0".repeat(surface.len()));
        uri_bindings.insert(surface.to_string(), ann.uri.clone());
        spans.push(Span {
            start,
            end,
            surface: surface.to_string(),
            entity_type: ann.entity_type(),
        });
    }

    spans.sort_by_key(|s| s.start);
    let mut tagged = String::with_capacity(question.len() + spans.len() * 2);
    let mut last = 0;
    for s in &spans {
        tagged.push_str(&question[last..s.start]);
        tagged.push('<');
        tagged.push_str(&s.surface);
        tagged.push('>');
        last = s.end;
    }
    tagged.push_str(&question[last..]);

    let mentions = spans
        .into_iter()
        .map(|s| EntityMention {
            offset: Some(question[..s.start].chars().count()),
            surface: s.surface,
            entity_type: s.entity_type,
        })
        .collect();

    Tagging {
        tagged_question: tagged,
        uri_bindings,
        mentions,
    }
}

fn char_to_byte(text: &str, char_offset: usize) -> Option<usize> {
    text.char_indices()
        .map(|(b, _)| b)
        .chain(std::iter::once(text.len()))
        .nth(char_offset)
}

/// Primary linking strategy backed by an [`AnnotationService`].
pub struct AnnotationLinker {
    service: Arc<dyn AnnotationService>,
    confidence: f64,
    min_spans: usize,
}

impl AnnotationLinker {
    pub fn new(service: Arc<dyn AnnotationService>, confidence: f64, min_spans: usize) -> Self {
        Self {
            service,
            confidence,
            min_spans,
        }
    }
}

#[async_trait]
impl LinkStrategy for AnnotationLinker {
    fn name(&self) -> &'static str {
        "annotation"
    }

    async fn try_link(&self, question: &str) -> LinkAttempt {
        let annotations = match self.service.annotate(question, self.confidence).await {
            Ok(a) => a,
            Err(e) => return LinkAttempt::failed(None, e.to_string()),
        };
        debug!(candidates = annotations.len(), "annotation service replied");
        if annotations.is_empty() {
            return LinkAttempt::failed(None, "annotation service returned no resources");
        }

        let tagging = tag_question(question, &annotations);
        if tagging.mentions.len() < self.min_spans {
            let partial = (!tagging.mentions.is_empty()).then_some(tagging.tagged_question);
            return LinkAttempt::failed(
                partial,
                format!(
                    "matched {} span(s), need at least {}",
                    tagging.mentions.len(),
                    self.min_spans
                ),
            );
        }

        LinkAttempt::Linked(LinkedQuestion {
            tagged_question: tagging.tagged_question,
            uri_bindings: tagging.uri_bindings,
            mentions: tagging.mentions,
            strategy: self.name().to_string(),
        })
    }
}
