//! Live validation of candidate queries.

use crate::endpoint::{QueryAnswer, SparqlEndpoint};
use crate::parsing::clean_endpoint_message;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const EMPTY_RESULT_DIAGNOSTIC: &str = "Query executed successfully but returned empty results. \
Please regenerate the query with different parameters or conditions.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Valid,
    Invalid { diagnostic: String },
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid)
    }

    fn invalid(diagnostic: impl Into<String>) -> Self {
        ValidationOutcome::Invalid {
            diagnostic: diagnostic.into(),
        }
    }
}

/// Executes candidates against the endpoint. Holds no per-query state.
pub struct QueryValidator {
    endpoint: Arc<dyn SparqlEndpoint>,
    timeout: Duration,
}

impl QueryValidator {
    pub fn new(endpoint: Arc<dyn SparqlEndpoint>, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }

    /// ASK answers are always valid, `false` included. SELECT answers need at
    /// least one binding. Endpoint errors are invalid with a cleaned message.
    pub async fn validate(&self, query: &str) -> ValidationOutcome {
        let outcome = match tokio::time::timeout(self.timeout, self.endpoint.query(query)).await {
            Ok(Ok(QueryAnswer::Boolean(_))) => ValidationOutcome::Valid,
            Ok(Ok(QueryAnswer::Bindings(rows))) if rows.is_empty() => {
                ValidationOutcome::invalid(EMPTY_RESULT_DIAGNOSTIC)
            }
            Ok(Ok(QueryAnswer::Bindings(_))) => ValidationOutcome::Valid,
            Ok(Err(e)) => {
                let cleaned = clean_endpoint_message(&e.to_string());
                ValidationOutcome::invalid(if cleaned.is_empty() {
                    "endpoint rejected the query".to_string()
                } else {
                    cleaned
                })
            }
            Err(_) => ValidationOutcome::invalid(format!(
                "endpoint did not answer within {}s",
                self.timeout.as_secs()
            )),
        };
        debug!(valid = outcome.is_valid(), "validated candidate");
        outcome
    }
}
