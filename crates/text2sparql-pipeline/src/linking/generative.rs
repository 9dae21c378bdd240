//! Generative-model linking: tag the question with a reasoning template, then
//! ask for one URI per tag.

use super::{EntityMention, LinkAttempt, LinkStrategy, LinkedQuestion};
use crate::complete_text;
use crate::parsing::{parse_extraction, parse_uri_lines};
use crate::prompts;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use text2sparql_llm::{CompletionRequest, LlmProvider};
use tracing::debug;

const EXTRACTION_MAX_TOKENS: usize = 400;
const URI_MAX_TOKENS: usize = 500;

pub struct GenerativeLinker {
    llm: Arc<dyn LlmProvider>,
    timeout: Duration,
}

impl GenerativeLinker {
    pub fn new(llm: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }
}

#[async_trait]
impl LinkStrategy for GenerativeLinker {
    fn name(&self) -> &'static str {
        "generative"
    }

    async fn try_link(&self, question: &str) -> LinkAttempt {
        let request = CompletionRequest::system_user(
            prompts::EXTRACTION_SYSTEM,
            prompts::extraction_user(question),
        )
        .temperature(0.0)
        .max_tokens(EXTRACTION_MAX_TOKENS);
        let reply = match complete_text(self.llm.as_ref(), request, self.timeout).await {
            Ok(r) => r,
            Err(e) => return LinkAttempt::failed(None, format!("extraction call failed: {e}")),
        };

        let extraction = match parse_extraction(&reply) {
            Ok(x) => x,
            Err(reason) => return LinkAttempt::failed(None, reason),
        };
        debug!(
            tagged = %extraction.tagged_question,
            entities = extraction.entities.len(),
            "parsed extraction reply"
        );

        let request = CompletionRequest::system_user(
            prompts::URI_SYSTEM,
            prompts::uri_user(&extraction.tagged_question, &extraction.entities),
        )
        .temperature(0.0)
        .max_tokens(URI_MAX_TOKENS);
        let reply = match complete_text(self.llm.as_ref(), request, self.timeout).await {
            Ok(r) => r,
            Err(e) => {
                return LinkAttempt::failed(
                    Some(extraction.tagged_question),
                    format!("URI call failed: {e}"),
                )
            }
        };

        let uri_bindings = parse_uri_lines(&reply);
        if uri_bindings.is_empty() {
            return LinkAttempt::failed(
                Some(extraction.tagged_question),
                "URI reply contained no usable `tag : uri` lines",
            );
        }

        let mentions = extraction
            .entities
            .iter()
            .map(|e| EntityMention {
                surface: e.value.clone(),
                offset: question
                    .find(e.value.as_str())
                    .map(|b| question[..b].chars().count()),
                entity_type: e.entity_type.clone(),
            })
            .collect();

        LinkAttempt::Linked(LinkedQuestion {
            tagged_question: extraction.tagged_question,
            uri_bindings,
            mentions,
            strategy: self.name().to_string(),
        })
    }
}
