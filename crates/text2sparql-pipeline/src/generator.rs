//! SPARQL synthesis with a one-shot correction fallback.

use crate::complete_text;
use crate::parsing::{parse_correction, parse_generation, GenerationReply};
use crate::prompts::{self, GenerationInput};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use text2sparql_llm::{CompletionRequest, LlmProvider};
use tracing::{debug, info, warn};

const GENERATION_MAX_TOKENS: usize = 800;
const CORRECTION_MAX_TOKENS: usize = 1000;

/// Where a candidate query came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "stage", content = "attempt")]
pub enum Provenance {
    Initial,
    /// Produced by the n-th repair call (1-based).
    Repair(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparqlCandidate {
    pub query: String,
    pub provenance: Provenance,
}

/// Inputs to one generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub question: &'a str,
    pub tagged_question: &'a str,
    pub uri_bindings: &'a BTreeMap<String, String>,
    pub neighbor_uris: &'a [String],
    pub retrieved_context: &'a str,
}

pub struct SparqlGenerator {
    llm: Arc<dyn LlmProvider>,
    timeout: Duration,
}

impl SparqlGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Generate a candidate; falls back to one correction call when the reply
    /// carries no query. `None` when neither stage yields one.
    pub async fn generate(&self, req: &GenerationRequest<'_>) -> Option<SparqlCandidate> {
        let user = prompts::generation_user(&GenerationInput {
            question: req.question,
            tagged_question: req.tagged_question,
            uri_bindings: req.uri_bindings,
            neighbor_uris: req.neighbor_uris,
            retrieved_context: req.retrieved_context,
        });
        let request = CompletionRequest::system_user(prompts::GENERATION_SYSTEM, user)
            .temperature(0.0)
            .max_tokens(GENERATION_MAX_TOKENS);

        let reply = match complete_text(self.llm.as_ref(), request, self.timeout).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "generation call failed");
                return None;
            }
        };

        match parse_generation(&reply) {
            GenerationReply::Query(query) => {
                info!(bytes = query.len(), "generated candidate query");
                return Some(SparqlCandidate {
                    query,
                    provenance: Provenance::Initial,
                });
            }
            GenerationReply::InvalidInput => debug!("generation reply was the invalid-input sentinel"),
            GenerationReply::Unparsed => debug!("generation reply had no query marker"),
        }

        let query = self.correct(req, &reply).await?;
        info!(bytes = query.len(), "correction produced candidate query");
        Some(SparqlCandidate {
            query,
            provenance: Provenance::Initial,
        })
    }

    async fn correct(&self, req: &GenerationRequest<'_>, failed_reply: &str) -> Option<String> {
        let request = CompletionRequest::system_user(
            prompts::CORRECTION_SYSTEM,
            prompts::correction_user(
                req.question,
                req.tagged_question,
                req.uri_bindings,
                failed_reply,
            ),
        )
        .temperature(0.0)
        .max_tokens(CORRECTION_MAX_TOKENS);
        let reply = match complete_text(self.llm.as_ref(), request, self.timeout).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "correction call failed");
                return None;
            }
        };
        let parsed = parse_correction(&reply);
        if parsed.is_none() {
            warn!("correction reply had neither a marker nor a fenced query");
        }
        parsed
    }
}
