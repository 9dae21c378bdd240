//! Natural-language question → SPARQL query.
//!
//! ```text
//! QuestionNormalizer → LinkerChain (annotation | generative)
//!     → NeighborFetcher ∥ RetrievalIndex
//!     → SparqlGenerator → QueryValidator ⇄ RepairLoop → PipelineResult
//! ```
//!
//! Every external service sits behind a trait (`LlmProvider`,
//! `AnnotationService`, `SparqlEndpoint`, `Embedder`) so the whole pipeline can
//! run against in-memory fakes.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod generator;
pub mod linking;
pub mod neighbors;
pub mod normalizer;
pub mod parsing;
pub mod pipeline;
pub mod prompts;
pub mod repair;
pub mod validator;

pub use config::{ClarificationPolicy, NeighborLimits, PipelineConfig};
pub use endpoint::{HttpSparqlEndpoint, QueryAnswer, RdfTerm, SparqlEndpoint};
pub use error::{AnnotationError, EndpointError, PipelineError};
pub use generator::{Provenance, SparqlCandidate, SparqlGenerator};
pub use linking::spotlight::{Annotation, AnnotationService, SpotlightClient};
pub use linking::{LinkAttempt, LinkStrategy, LinkedQuestion, LinkerChain};
pub use pipeline::{Pipeline, PipelineResult, Status};
pub use validator::{QueryValidator, ValidationOutcome};

use std::time::Duration;
use text2sparql_llm::{CompletionRequest, LlmProvider};

/// One completion call with a deadline; trimmed reply text or a reason.
pub(crate) async fn complete_text(
    llm: &dyn LlmProvider,
    request: CompletionRequest,
    timeout: Duration,
) -> Result<String, String> {
    match tokio::time::timeout(timeout, llm.complete(request)).await {
        Ok(Ok(response)) => Ok(response.content.trim().to_string()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("no reply within {}s", timeout.as_secs())),
    }
}
