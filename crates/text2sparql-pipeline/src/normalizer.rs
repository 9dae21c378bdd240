//! Question normalization: translate to English, then clarify.

use crate::complete_text;
use crate::config::ClarificationPolicy;
use crate::error::PipelineError;
use crate::parsing::clean_clarification;
use crate::prompts;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use text2sparql_llm::{CompletionRequest, LlmProvider};
use tracing::{debug, warn};

const TRANSLATE_MAX_TOKENS: usize = 500;
const CLARIFY_MAX_TOKENS: usize = 600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedQuestion {
    pub original: String,
    /// Translation; used for generation, retrieval and repair.
    pub english: String,
    /// Clarified text; used for entity linking.
    pub rewritten: String,
    /// Set when clarification failed and `english` was reused.
    #[serde(default)]
    pub clarification_skipped: bool,
}

pub struct QuestionNormalizer {
    llm: Arc<dyn LlmProvider>,
    timeout: Duration,
    policy: ClarificationPolicy,
}

impl QuestionNormalizer {
    pub fn new(llm: Arc<dyn LlmProvider>, timeout: Duration, policy: ClarificationPolicy) -> Self {
        Self {
            llm,
            timeout,
            policy,
        }
    }

    pub async fn translate(&self, question: &str) -> Result<String, PipelineError> {
        let request = CompletionRequest::system_user(
            prompts::TRANSLATE_SYSTEM,
            prompts::translate_user(question),
        )
        .temperature(0.1)
        .max_tokens(TRANSLATE_MAX_TOKENS);
        let text = complete_text(self.llm.as_ref(), request, self.timeout)
            .await
            .map_err(PipelineError::Translation)?;
        if text.is_empty() {
            return Err(PipelineError::Translation("empty translation".to_string()));
        }
        Ok(text)
    }

    /// Clarified question, or the reason clarification produced nothing.
    pub async fn clarify(&self, question: &str) -> Result<String, String> {
        let request =
            CompletionRequest::system_user(prompts::CLARIFY_SYSTEM, prompts::clarify_user(question))
                .max_tokens(CLARIFY_MAX_TOKENS);
        let reply = complete_text(self.llm.as_ref(), request, self.timeout).await?;
        clean_clarification(&reply).ok_or_else(|| "empty clarification".to_string())
    }

    pub async fn normalize(&self, question: &str) -> Result<NormalizedQuestion, PipelineError> {
        let english = self.translate(question).await?;
        debug!(%english, "translated question");

        let (rewritten, clarification_skipped) = match self.clarify(&english).await {
            Ok(r) => (r, false),
            Err(reason) => match self.policy {
                ClarificationPolicy::FailFast => return Err(PipelineError::Clarification(reason)),
                ClarificationPolicy::FallBack => {
                    warn!(%reason, "clarification failed, continuing with translated question");
                    (english.clone(), true)
                }
            },
        };
        debug!(%rewritten, "clarified question");

        Ok(NormalizedQuestion {
            original: question.to_string(),
            english,
            rewritten,
            clarification_skipped,
        })
    }
}
