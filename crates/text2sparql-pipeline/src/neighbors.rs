//! Neighbor-fact enrichment for bound entity URIs.

use crate::config::NeighborLimits;
use crate::endpoint::{QueryAnswer, SparqlEndpoint};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One outgoing edge of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborFact {
    pub property: String,
    pub neighbor: String,
    pub label: String,
}

pub struct NeighborFetcher {
    endpoint: Arc<dyn SparqlEndpoint>,
    namespace: String,
    limits: NeighborLimits,
    timeout: Duration,
}

impl NeighborFetcher {
    pub fn new(
        endpoint: Arc<dyn SparqlEndpoint>,
        namespace: &str,
        limits: NeighborLimits,
        timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            namespace: namespace.to_string(),
            limits,
            timeout,
        }
    }

    /// Move a URI into the resource namespace, keeping its last path segment.
    pub fn coerce_uri(&self, uri: &str) -> String {
        if uri.starts_with(&self.namespace) {
            return uri.to_string();
        }
        let last = uri.trim_end_matches('/').rsplit('/').next().unwrap_or(uri);
        format!("{}{}", self.namespace, last)
    }

    pub fn neighbor_query(&self, entity_uri: &str) -> String {
        format!(
            "PREFIX rdfs: <http://www.w3.org/2000/01/rdf-schema#>\n\
SELECT DISTINCT ?property ?neighbor ?neighborLabel WHERE {{\n\
  <{entity_uri}> ?property ?neighbor .\n\
  FILTER (isURI(?neighbor) && STRSTARTS(STR(?neighbor), \"{ns}\"))\n\
  OPTIONAL {{\n\
    ?neighbor rdfs:label ?neighborLabel .\n\
    FILTER (LANG(?neighborLabel) = \"en\")\n\
  }}\n\
}}\n\
LIMIT {limit}",
            ns = self.namespace,
            limit = self.limits.query_limit,
        )
    }

    /// Neighbors of one entity, at most `per_entity` of them with distinct
    /// labels. Any failure yields an empty list.
    pub async fn neighbors(&self, entity_uri: &str) -> Vec<NeighborFact> {
        let uri = self.coerce_uri(entity_uri);
        if !is_safe_iri(&uri) {
            warn!(%uri, "refusing to embed malformed IRI in neighbor query");
            return Vec::new();
        }
        let query = self.neighbor_query(&uri);
        let answer = match tokio::time::timeout(self.timeout, self.endpoint.query(&query)).await {
            Ok(Ok(a)) => a,
            Ok(Err(e)) => {
                warn!(%uri, error = %e, "neighbor query failed");
                return Vec::new();
            }
            Err(_) => {
                warn!(%uri, timeout_secs = self.timeout.as_secs(), "neighbor query timed out");
                return Vec::new();
            }
        };
        let QueryAnswer::Bindings(rows) = answer else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut facts = Vec::new();
        for row in rows {
            if facts.len() >= self.limits.per_entity {
                break;
            }
            let Some(neighbor) = row.get("neighbor").map(|t| t.value.clone()) else {
                continue;
            };
            let property = row.get("property").map(|t| t.value.clone()).unwrap_or_default();
            let label = row
                .get("neighborLabel")
                .map(|t| t.value.clone())
                .unwrap_or_else(|| default_label(&neighbor));
            if !seen.insert(label.clone()) {
                continue;
            }
            facts.push(NeighborFact {
                property,
                neighbor,
                label,
            });
        }
        debug!(%uri, count = facts.len(), "fetched neighbors");
        facts
    }

    /// Per-entity share of the total budget for `k` bound URIs.
    pub fn per_entity_budget(&self, k: usize) -> usize {
        if k == 0 {
            return 0;
        }
        (self.limits.total / k).min(self.limits.per_entity)
    }

    /// Neighbor URIs for all bound URIs, fetched concurrently and capped so the
    /// total never exceeds the configured budget.
    pub async fn neighbor_uris(&self, bound: &[String]) -> Vec<String> {
        let budget = self.per_entity_budget(bound.len());
        if budget == 0 {
            return Vec::new();
        }
        let per_entity = join_all(bound.iter().map(|uri| self.neighbors(uri))).await;
        per_entity
            .into_iter()
            .flat_map(|facts| facts.into_iter().take(budget).map(|f| f.neighbor))
            .collect()
    }
}

fn default_label(uri: &str) -> String {
    uri.rsplit('/').next().unwrap_or(uri).replace('_', " ")
}

fn is_safe_iri(uri: &str) -> bool {
    !uri.is_empty()
        && !uri
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '<' | '>' | '"' | '{' | '}' | '|' | '^' | '`' | '\\'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{RdfTerm, Solution};
    use crate::error::EndpointError;
    use async_trait::async_trait;
    use proptest::prelude::*;

    struct Rows(usize);

    #[async_trait]
    impl SparqlEndpoint for Rows {
        async fn query(&self, sparql: &str) -> Result<QueryAnswer, EndpointError> {
            if sparql.contains("Broken") {
                return Err(EndpointError::Network("connection reset".into()));
            }
            let rows = (0..self.0)
                .map(|i| {
                    let mut row = Solution::new();
                    row.insert("property".into(), RdfTerm::uri("http://dbpedia.org/ontology/p"));
                    row.insert(
                        "neighbor".into(),
                        RdfTerm::uri(format!("http://dbpedia.org/resource/N_{i}")),
                    );
                    row
                })
                .collect();
            Ok(QueryAnswer::Bindings(rows))
        }
    }

    fn fetcher(rows: usize) -> NeighborFetcher {
        NeighborFetcher::new(
            Arc::new(Rows(rows)),
            "http://dbpedia.org/resource/",
            NeighborLimits::default(),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn coerces_foreign_uris_into_resource_namespace() {
        let f = fetcher(0);
        assert_eq!(
            f.coerce_uri("http://dbpedia.org/ontology/Paris"),
            "http://dbpedia.org/resource/Paris"
        );
        assert_eq!(
            f.coerce_uri("http://dbpedia.org/resource/Paris"),
            "http://dbpedia.org/resource/Paris"
        );
    }

    #[test]
    fn query_restricts_namespace_and_limit() {
        let q = fetcher(0).neighbor_query("http://dbpedia.org/resource/Paris");
        assert!(q.contains("<http://dbpedia.org/resource/Paris> ?property ?neighbor"));
        assert!(q.contains("STRSTARTS(STR(?neighbor), \"http://dbpedia.org/resource/\")"));
        assert!(q.contains("LANG(?neighborLabel) = \"en\""));
        assert!(q.trim_end().ends_with("LIMIT 30"));
    }

    #[tokio::test]
    async fn per_call_cap_and_default_labels() {
        let facts = fetcher(30).neighbors("http://dbpedia.org/resource/Paris").await;
        assert_eq!(facts.len(), 10);
        assert_eq!(facts[3].label, "N 3");
    }

    #[tokio::test]
    async fn endpoint_error_yields_empty_for_that_entity_only() {
        let uris = fetcher(30)
            .neighbor_uris(&[
                "http://dbpedia.org/resource/Broken".to_string(),
                "http://dbpedia.org/resource/Fine".to_string(),
            ])
            .await;
        assert_eq!(uris.len(), 10);
    }

    #[tokio::test]
    async fn zero_bound_uris_means_no_enrichment() {
        assert!(fetcher(30).neighbor_uris(&[]).await.is_empty());
    }

    proptest! {
        #[test]
        fn total_neighbors_never_exceed_budget(k in 0usize..12, rows in 0usize..40) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let bound: Vec<String> = (0..k).map(|i| format!("http://dbpedia.org/resource/E{i}")).collect();
            let uris = rt.block_on(fetcher(rows).neighbor_uris(&bound));
            prop_assert!(uris.len() <= 30);
            if k > 0 {
                prop_assert_eq!(uris.len(), k * rows.min(10).min(30 / k));
            }
        }
    }
}
