//! Entity linking and URI resolution.
//!
//! A [`LinkerChain`] holds [`LinkStrategy`] implementations in priority order
//! and returns the first success. Two strategies ship with the crate:
//!
//! - [`spotlight::AnnotationLinker`]: an entity-annotation service tags spans
//!   and resolves them to resource URIs in one call.
//! - [`generative::GenerativeLinker`]: a reasoning-template completion tags the
//!   question, then a second completion maps every tag to a URI.

pub mod generative;
pub mod spotlight;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// A mention found in the question text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMention {
    pub surface: String,
    /// Character offset in the linked question, when known.
    pub offset: Option<usize>,
    /// Coarse type guess, `"thing"` when unavailable.
    pub entity_type: String,
}

/// Successful linking result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedQuestion {
    /// Question with every mention wrapped in `<…>`, in reading order.
    pub tagged_question: String,
    /// Mention/tag text → knowledge-base URI. Never empty.
    pub uri_bindings: BTreeMap<String, String>,
    pub mentions: Vec<EntityMention>,
    /// Name of the strategy that produced this result.
    pub strategy: String,
}

/// Outcome of one strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAttempt {
    Linked(LinkedQuestion),
    Failed {
        /// Tagged question reached before failing, if any.
        partial: Option<String>,
        reason: String,
    },
}

impl LinkAttempt {
    pub fn failed(partial: Option<String>, reason: impl Into<String>) -> Self {
        LinkAttempt::Failed {
            partial,
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait LinkStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn try_link(&self, question: &str) -> LinkAttempt;
}

/// Every strategy failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFailure {
    /// Most recent partial tagged question.
    pub tagged_question: Option<String>,
    /// `strategy: reason` per attempted strategy.
    pub reasons: Vec<String>,
}

impl std::fmt::Display for LinkFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.reasons.is_empty() {
            return f.write_str("no linking strategy configured");
        }
        f.write_str(&self.reasons.join("; "))
    }
}

pub struct LinkerChain {
    strategies: Vec<Box<dyn LinkStrategy>>,
}

impl LinkerChain {
    pub fn new(strategies: Vec<Box<dyn LinkStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Try each strategy in order until one links the question.
    pub async fn link(&self, question: &str) -> Result<LinkedQuestion, LinkFailure> {
        let mut failure = LinkFailure {
            tagged_question: None,
            reasons: Vec::new(),
        };
        for strategy in &self.strategies {
            match strategy.try_link(question).await {
                LinkAttempt::Linked(linked) if !linked.uri_bindings.is_empty() => {
                    info!(
                        strategy = strategy.name(),
                        bindings = linked.uri_bindings.len(),
                        "linked question"
                    );
                    return Ok(linked);
                }
                LinkAttempt::Linked(linked) => {
                    warn!(strategy = strategy.name(), "strategy linked no URIs, falling back");
                    failure.tagged_question = Some(linked.tagged_question);
                    failure
                        .reasons
                        .push(format!("{}: no URI bindings", strategy.name()));
                }
                LinkAttempt::Failed { partial, reason } => {
                    warn!(strategy = strategy.name(), %reason, "linking strategy failed, falling back");
                    if partial.is_some() {
                        failure.tagged_question = partial;
                    }
                    failure.reasons.push(format!("{}: {reason}", strategy.name()));
                }
            }
        }
        Err(failure)
    }
}
