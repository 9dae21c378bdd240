//! Bounded validate → repair loop.
//!
//! ```text
//! Attempting(n) --valid--> Success
//! Attempting(n) --invalid, n < max, new candidate--> Attempting(n+1)
//! Attempting(n) --invalid, n < max, repair failed/unchanged--> Exhausted
//! Attempting(n) --invalid, n = max--> Exhausted
//! ```
//!
//! At most `max_retries + 1` validations are performed.

use crate::complete_text;
use crate::generator::{Provenance, SparqlCandidate};
use crate::parsing::postprocess_query;
use crate::prompts::{self, RepairInput};
use crate::validator::{QueryValidator, ValidationOutcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use text2sparql_llm::{CompletionRequest, LlmProvider};
use tracing::{debug, info, warn};

const REPAIR_TEMPERATURE: f32 = 0.3;
const REPAIR_MAX_TOKENS: usize = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairState {
    Attempting(usize),
    Success,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustReason {
    /// `max_retries` repairs were spent.
    BoundReached,
    /// The repair call returned nothing usable or the same query.
    Stalled,
    /// The repair call itself failed.
    RepairFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    Success {
        candidate: SparqlCandidate,
        validations: usize,
    },
    Exhausted {
        /// Last invalid candidate.
        candidate: SparqlCandidate,
        diagnostic: String,
        validations: usize,
        reason: ExhaustReason,
    },
}

impl RepairOutcome {
    pub fn candidate(&self) -> &SparqlCandidate {
        match self {
            RepairOutcome::Success { candidate, .. } | RepairOutcome::Exhausted { candidate, .. } => {
                candidate
            }
        }
    }

    pub fn validations(&self) -> usize {
        match self {
            RepairOutcome::Success { validations, .. }
            | RepairOutcome::Exhausted { validations, .. } => *validations,
        }
    }
}

/// Context handed to every repair call.
#[derive(Debug, Clone, Copy)]
pub struct RepairContext<'a> {
    pub question: &'a str,
    pub tagged_question: &'a str,
    pub uri_bindings: &'a BTreeMap<String, String>,
}

pub struct RepairLoop {
    llm: Arc<dyn LlmProvider>,
    timeout: Duration,
}

impl RepairLoop {
    pub fn new(llm: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    pub async fn run(
        &self,
        validator: &QueryValidator,
        initial: SparqlCandidate,
        ctx: RepairContext<'_>,
        max_retries: usize,
    ) -> RepairOutcome {
        let mut candidate = initial;
        let mut n = 0;
        let mut validations = 0;

        loop {
            debug!(state = ?RepairState::Attempting(n), "repair loop");
            validations += 1;
            let diagnostic = match validator.validate(&candidate.query).await {
                ValidationOutcome::Valid => {
                    info!(attempt = n, state = ?RepairState::Success, "candidate validated");
                    return RepairOutcome::Success {
                        candidate,
                        validations,
                    };
                }
                ValidationOutcome::Invalid { diagnostic } => diagnostic,
            };
            info!(attempt = n, %diagnostic, "candidate invalid");

            if n >= max_retries {
                warn!(attempt = n, state = ?RepairState::Exhausted, "repair budget exhausted");
                return RepairOutcome::Exhausted {
                    candidate,
                    diagnostic,
                    validations,
                    reason: ExhaustReason::BoundReached,
                };
            }

            let repaired = match self.repair(&candidate.query, &diagnostic, ctx).await {
                Ok(Some(q)) if q != candidate.query => q,
                Ok(_) => {
                    warn!(attempt = n, "repair returned no new query");
                    return RepairOutcome::Exhausted {
                        candidate,
                        diagnostic,
                        validations,
                        reason: ExhaustReason::Stalled,
                    };
                }
                Err(e) => {
                    warn!(attempt = n, error = %e, "repair call failed");
                    return RepairOutcome::Exhausted {
                        candidate,
                        diagnostic,
                        validations,
                        reason: ExhaustReason::RepairFailed,
                    };
                }
            };

            candidate = SparqlCandidate {
                query: repaired,
                provenance: Provenance::Repair(n + 1),
            };
            n += 1;
        }
    }

    async fn repair(
        &self,
        query: &str,
        diagnostic: &str,
        ctx: RepairContext<'_>,
    ) -> Result<Option<String>, String> {
        let user = prompts::repair_user(&RepairInput {
            query,
            diagnostic,
            question: ctx.question,
            tagged_question: ctx.tagged_question,
            uri_bindings: ctx.uri_bindings,
        });
        let request = CompletionRequest::system_user(prompts::REPAIR_SYSTEM, user)
            .temperature(REPAIR_TEMPERATURE)
            .max_tokens(REPAIR_MAX_TOKENS);
        let reply = complete_text(self.llm.as_ref(), request, self.timeout).await?;
        Ok(postprocess_query(&reply))
    }
}
