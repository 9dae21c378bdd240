//! SPARQL endpoint access (SPARQL 1.1 protocol, JSON results).

use crate::error::EndpointError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// One bound value of a solution row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RdfTerm {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    #[serde(rename = "xml:lang", default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
}

impl RdfTerm {
    pub fn uri(value: impl Into<String>) -> Self {
        Self {
            kind: "uri".to_string(),
            value: value.into(),
            lang: None,
            datatype: None,
        }
    }

    pub fn literal(value: impl Into<String>, lang: Option<&str>) -> Self {
        Self {
            kind: "literal".to_string(),
            value: value.into(),
            lang: lang.map(str::to_string),
            datatype: None,
        }
    }
}

pub type Solution = BTreeMap<String, RdfTerm>;

/// Result of executing a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryAnswer {
    /// ASK
    Boolean(bool),
    /// SELECT
    Bindings(Vec<Solution>),
}

#[async_trait]
pub trait SparqlEndpoint: Send + Sync {
    async fn query(&self, sparql: &str) -> Result<QueryAnswer, EndpointError>;
}

#[derive(Debug, Deserialize)]
struct SparqlJson {
    #[serde(default)]
    boolean: Option<bool>,
    #[serde(default)]
    results: Option<SparqlJsonResults>,
}

#[derive(Debug, Deserialize)]
struct SparqlJsonResults {
    #[serde(default)]
    bindings: Vec<Solution>,
}

/// Decode a `application/sparql-results+json` body.
pub fn parse_results_json(body: &str) -> Result<QueryAnswer, EndpointError> {
    let parsed: SparqlJson =
        serde_json::from_str(body).map_err(|e| EndpointError::InvalidResponse(e.to_string()))?;
    match (parsed.boolean, parsed.results) {
        (Some(b), _) => Ok(QueryAnswer::Boolean(b)),
        (None, Some(r)) => Ok(QueryAnswer::Bindings(r.bindings)),
        (None, None) => Err(EndpointError::InvalidResponse(
            "neither `boolean` nor `results` present".to_string(),
        )),
    }
}

/// HTTP endpoint client; queries are sent as GET parameters.
#[derive(Debug, Clone)]
pub struct HttpSparqlEndpoint {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpSparqlEndpoint {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, EndpointError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EndpointError::Network(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send(&self, sparql: &str) -> Result<QueryAnswer, EndpointError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("query", sparql), ("format", "json")])
            .header("Accept", "application/sparql-results+json")
            .send()
            .await
            .map_err(|e| EndpointError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EndpointError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(EndpointError::Status {
                status: status.as_u16(),
                body,
            });
        }
        parse_results_json(&body)
    }
}

#[async_trait]
impl SparqlEndpoint for HttpSparqlEndpoint {
    async fn query(&self, sparql: &str) -> Result<QueryAnswer, EndpointError> {
        debug!(endpoint = %self.url, bytes = sparql.len(), "executing SPARQL");
        match tokio::time::timeout(self.timeout, self.send(sparql)).await {
            Ok(result) => result,
            Err(_) => Err(EndpointError::Timeout(self.timeout.as_secs())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ask_false_is_a_boolean_answer() {
        let answer = parse_results_json(r#"{"head": {}, "boolean": false}"#).unwrap();
        assert_eq!(answer, QueryAnswer::Boolean(false));
    }

    #[test]
    fn select_bindings_decode() {
        let body = r#"{
            "head": {"vars": ["p"]},
            "results": {"bindings": [
                {"p": {"type": "typed-literal", "datatype": "http://www.w3.org/2001/XMLSchema#nonNegativeInteger", "value": "2165423"}}
            ]}
        }"#;
        let QueryAnswer::Bindings(rows) = parse_results_json(body).unwrap() else {
            panic!("expected bindings");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["p"].value, "2165423");
    }

    #[test]
    fn unrecognized_body_is_invalid() {
        assert!(matches!(
            parse_results_json(r#"{"head": {}}"#),
            Err(EndpointError::InvalidResponse(_))
        ));
        assert!(parse_results_json("<html>").is_err());
    }
}
