//! Request-scoped orchestration of every stage.

use crate::config::PipelineConfig;
use crate::endpoint::{HttpSparqlEndpoint, SparqlEndpoint};
use crate::error::PipelineError;
use crate::generator::{GenerationRequest, Provenance, SparqlGenerator};
use crate::linking::generative::GenerativeLinker;
use crate::linking::spotlight::{AnnotationLinker, AnnotationService, SpotlightClient};
use crate::linking::{LinkStrategy, LinkerChain};
use crate::neighbors::NeighborFetcher;
use crate::normalizer::{NormalizedQuestion, QuestionNormalizer};
use crate::repair::{ExhaustReason, RepairContext, RepairLoop, RepairOutcome};
use crate::validator::QueryValidator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use text2sparql_llm::LlmProvider;
use text2sparql_rag::{RetrievalIndex, RetrievalQuery};
use tokio::sync::Semaphore;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

impl From<&PipelineError> for ErrorInfo {
    fn from(e: &PipelineError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

/// Terminal record of one execution. Carries the last known partial state on
/// failure as well as on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub request_id: String,
    pub status: Status,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized: Option<NormalizedQuestion>,
    pub tagged_question: Option<String>,
    pub uri_bindings: BTreeMap<String, String>,
    pub sparql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linking_strategy: Option<String>,
    /// Validation calls made.
    pub validations: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl PipelineResult {
    fn new(request_id: &str, question: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            status: Status::Error,
            question: question.to_string(),
            normalized: None,
            tagged_question: None,
            uri_bindings: BTreeMap::new(),
            sparql: None,
            provenance: None,
            linking_strategy: None,
            validations: 0,
            error: None,
        }
    }

    fn fail(mut self, error: PipelineError) -> Self {
        warn!(kind = error.kind(), %error, "pipeline failed");
        self.status = Status::Error;
        self.error = Some(ErrorInfo::from(&error));
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    normalizer: QuestionNormalizer,
    linker: LinkerChain,
    neighbors: NeighborFetcher,
    index: Arc<RetrievalIndex>,
    generator: SparqlGenerator,
    validator: QueryValidator,
    repair: RepairLoop,
    admission: Semaphore,
}

impl Pipeline {
    /// Assemble a pipeline from injected services. Linking tries the
    /// annotation service first and the generative extractor second.
    pub fn new(
        config: PipelineConfig,
        llm: Arc<dyn LlmProvider>,
        annotator: Arc<dyn AnnotationService>,
        endpoint: Arc<dyn SparqlEndpoint>,
        index: Arc<RetrievalIndex>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let timeout = config.call_timeout();
        let strategies: Vec<Box<dyn LinkStrategy>> = vec![
            Box::new(AnnotationLinker::new(
                annotator,
                config.annotation_confidence,
                config.min_annotated_spans,
            )),
            Box::new(GenerativeLinker::new(llm.clone(), timeout)),
        ];
        Ok(Self {
            normalizer: QuestionNormalizer::new(llm.clone(), timeout, config.clarification_policy),
            linker: LinkerChain::new(strategies),
            neighbors: NeighborFetcher::new(
                endpoint.clone(),
                &config.resource_namespace,
                config.neighbors.clone(),
                timeout,
            ),
            index,
            generator: SparqlGenerator::new(llm.clone(), timeout),
            validator: QueryValidator::new(endpoint, timeout),
            repair: RepairLoop::new(llm, timeout),
            admission: Semaphore::new(config.max_concurrent_requests),
            config,
        })
    }

    /// Pipeline over the configured HTTP endpoint and annotation service.
    pub fn from_config(
        config: PipelineConfig,
        llm: Arc<dyn LlmProvider>,
        index: Arc<RetrievalIndex>,
    ) -> Result<Self, PipelineError> {
        let timeout = config.call_timeout();
        let endpoint = HttpSparqlEndpoint::new(&config.endpoint_url, timeout)
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        let annotator = SpotlightClient::new(&config.annotation_url, timeout)
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        Self::new(config, llm, Arc::new(annotator), Arc::new(endpoint), index)
    }

    /// Replace the linking strategies.
    pub fn with_linker(mut self, linker: LinkerChain) -> Self {
        self.linker = linker;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn validator(&self) -> &QueryValidator {
        &self.validator
    }

    /// Run with the configured retry budget.
    pub async fn run(&self, question: &str) -> PipelineResult {
        self.execute(question, self.config.max_retries).await
    }

    /// One request, start to finish. Waits for an admission permit first;
    /// dropping the returned future abandons every in-flight call.
    pub async fn execute(&self, question: &str, max_retries: usize) -> PipelineResult {
        let request_id = Uuid::new_v4().to_string();
        let span = info_span!("pipeline", request_id = %request_id);
        async {
            let Ok(_permit) = self.admission.acquire().await else {
                return PipelineResult::new(&request_id, question)
                    .fail(PipelineError::Config("admission gate closed".to_string()));
            };
            let result = self.execute_inner(&request_id, question, max_retries).await;
            info!(
                status = ?result.status,
                validations = result.validations,
                "pipeline finished"
            );
            result
        }
        .instrument(span)
        .await
    }

    async fn execute_inner(&self, request_id: &str, question: &str, max_retries: usize) -> PipelineResult {
        let mut result = PipelineResult::new(request_id, question);

        let normalized = match self.normalizer.normalize(question).await {
            Ok(n) => n,
            Err(e) => return result.fail(e),
        };
        info!(english = %normalized.english, rewritten = %normalized.rewritten, "question normalized");
        result.normalized = Some(normalized.clone());

        let linked = match self.linker.link(&normalized.rewritten).await {
            Ok(l) => l,
            Err(failure) => {
                result.tagged_question = failure.tagged_question.clone();
                return result.fail(PipelineError::Extraction(failure.to_string()));
            }
        };
        result.tagged_question = Some(linked.tagged_question.clone());
        result.uri_bindings = linked.uri_bindings.clone();
        result.linking_strategy = Some(linked.strategy.clone());

        let bound: Vec<String> = linked.uri_bindings.values().cloned().collect();
        let (neighbor_uris, context) = tokio::join!(
            self.neighbors.neighbor_uris(&bound),
            self.retrieved_context(&normalized.english)
        );
        info!(
            neighbors = neighbor_uris.len(),
            context_bytes = context.len(),
            "generation context assembled"
        );

        let request = GenerationRequest {
            question: &normalized.english,
            tagged_question: &linked.tagged_question,
            uri_bindings: &linked.uri_bindings,
            neighbor_uris: &neighbor_uris,
            retrieved_context: &context,
        };
        let Some(candidate) = self.generator.generate(&request).await else {
            return result.fail(PipelineError::Generation(
                "no parseable query from generation or correction".to_string(),
            ));
        };

        let ctx = RepairContext {
            question: &normalized.english,
            tagged_question: &linked.tagged_question,
            uri_bindings: &linked.uri_bindings,
        };
        let outcome = self
            .repair
            .run(&self.validator, candidate, ctx, max_retries)
            .await;
        result.validations = outcome.validations();
        result.sparql = Some(outcome.candidate().query.clone());
        result.provenance = Some(outcome.candidate().provenance);

        match outcome {
            RepairOutcome::Success { .. } => {
                result.status = Status::Success;
                result
            }
            RepairOutcome::Exhausted {
                diagnostic,
                validations,
                reason,
                ..
            } => {
                let error = if reason == ExhaustReason::BoundReached && max_retries == 0 {
                    PipelineError::Validation(diagnostic)
                } else {
                    PipelineError::RepairExhausted {
                        attempts: validations,
                        diagnostic,
                    }
                };
                result.fail(error)
            }
        }
    }

    /// Few-shot context; retrieval problems degrade to no context.
    async fn retrieved_context(&self, question: &str) -> String {
        let query = RetrievalQuery::new(question).top_k(self.config.top_k);
        match tokio::time::timeout(self.config.call_timeout(), self.index.context_for(&query)).await {
            Ok(Ok(ctx)) => ctx,
            Ok(Err(e)) => {
                warn!(error = %e, "retrieval failed, generating without exemplars");
                String::new()
            }
            Err(_) => {
                warn!("retrieval timed out, generating without exemplars");
                String::new()
            }
        }
    }
}
