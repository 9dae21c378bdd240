//! Failure taxonomy for one pipeline execution.

use thiserror::Error;

/// Terminal failure of a pipeline stage.
///
/// Every external-service error is converted into one of these at its call
/// boundary; raw client errors never leave the component that made the call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("translation failed: {0}")]
    Translation(String),

    #[error("clarification failed: {0}")]
    Clarification(String),

    #[error("entity extraction failed: {0}")]
    Extraction(String),

    #[error("SPARQL generation failed: {0}")]
    Generation(String),

    #[error("query validation failed: {0}")]
    Validation(String),

    #[error("repair exhausted after {attempts} validation(s): {diagnostic}")]
    RepairExhausted { attempts: usize, diagnostic: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Stable machine tag, used in serialized results.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Translation(_) => "translation_failure",
            PipelineError::Clarification(_) => "clarification_failure",
            PipelineError::Extraction(_) => "extraction_failure",
            PipelineError::Generation(_) => "generation_failure",
            PipelineError::Validation(_) => "validation_failure",
            PipelineError::RepairExhausted { .. } => "repair_exhausted",
            PipelineError::Config(_) => "config_error",
        }
    }
}

/// Errors from a SPARQL endpoint call.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("endpoint request failed: {0}")]
    Network(String),

    #[error("endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected endpoint response: {0}")]
    InvalidResponse(String),

    #[error("endpoint call timed out after {0}s")]
    Timeout(u64),
}

/// Errors from the entity-annotation service.
#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("annotation request failed: {0}")]
    Network(String),

    #[error("annotation service returned HTTP {0}")]
    Status(u16),

    #[error("unexpected annotation response: {0}")]
    InvalidResponse(String),

    #[error("annotation call timed out after {0}s")]
    Timeout(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinct() {
        let all = [
            PipelineError::Translation(String::new()),
            PipelineError::Clarification(String::new()),
            PipelineError::Extraction(String::new()),
            PipelineError::Generation(String::new()),
            PipelineError::Validation(String::new()),
            PipelineError::RepairExhausted {
                attempts: 3,
                diagnostic: String::new(),
            },
            PipelineError::Config(String::new()),
        ];
        let mut kinds: Vec<_> = all.iter().map(PipelineError::kind).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), all.len());
    }

    #[test]
    fn repair_exhausted_message_names_attempts() {
        let e = PipelineError::RepairExhausted {
            attempts: 3,
            diagnostic: "empty results".into(),
        };
        assert_eq!(e.to_string(), "repair exhausted after 3 validation(s): empty results");
    }
}
