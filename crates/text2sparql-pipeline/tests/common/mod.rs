//! Scripted in-memory fakes of the external services.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use text2sparql_llm::{
    CompletionRequest, CompletionResponse, LlmError, LlmProvider, ModelInfo, Provider,
    TokenHashEmbedder,
};
use text2sparql_pipeline::endpoint::Solution;
use text2sparql_pipeline::{
    Annotation, AnnotationError, AnnotationService, EndpointError, QueryAnswer, RdfTerm,
    SparqlEndpoint,
};
use text2sparql_rag::{Exemplar, RetrievalIndex};

/// Replies are queued per system prompt, so each pipeline stage gets its own
/// script regardless of call order.
#[derive(Default)]
pub struct ScriptedLlm {
    scripts: Mutex<HashMap<String, VecDeque<Result<String, String>>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, system: &str, text: &str) -> Self {
        self.scripts
            .lock()
            .entry(system.to_string())
            .or_default()
            .push_back(Ok(text.to_string()));
        self
    }

    pub fn fail(self, system: &str, error: &str) -> Self {
        self.scripts
            .lock()
            .entry(system.to_string())
            .or_default()
            .push_back(Err(error.to_string()));
        self
    }

    pub fn requests_for(&self, system: &str) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.system_prompt() == Some(system))
            .cloned()
            .collect()
    }

    pub fn calls_for(&self, system: &str) -> usize {
        self.requests_for(system).len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let system = request.system_prompt().unwrap_or_default().to_string();
        self.requests.lock().push(request);
        let next = self
            .scripts
            .lock()
            .get_mut(&system)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Ok(text)) => Ok(CompletionResponse::text(text, "scripted")),
            Some(Err(e)) => Err(LlmError::Api(e)),
            None => Err(LlmError::Api("script exhausted".to_string())),
        }
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: "scripted".to_string(),
            provider: Provider::Custom,
        }
    }
}

/// Annotation service with a fixed answer; `None` simulates an outage.
pub struct FixedAnnotator(pub Option<Vec<Annotation>>);

#[async_trait]
impl AnnotationService for FixedAnnotator {
    async fn annotate(&self, _text: &str, _confidence: f64) -> Result<Vec<Annotation>, AnnotationError> {
        self.0
            .clone()
            .ok_or_else(|| AnnotationError::Network("annotator unreachable".to_string()))
    }
}

pub fn annotation(surface: &str, offset: usize, uri: &str) -> Annotation {
    Annotation {
        uri: uri.to_string(),
        surface_form: surface.to_string(),
        offset,
        types: "DBpedia:Place".to_string(),
    }
}

type Responder = Box<dyn Fn(&str) -> Result<QueryAnswer, EndpointError> + Send + Sync>;

/// Endpoint answering validation queries through `responder`; neighbor
/// queries get `neighbors` bindings each.
pub struct FakeEndpoint {
    responder: Responder,
    neighbors: usize,
    validated: Mutex<Vec<String>>,
}

impl FakeEndpoint {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&str) -> Result<QueryAnswer, EndpointError> + Send + Sync + 'static,
    {
        Self::with_neighbors(0, responder)
    }

    pub fn with_neighbors<F>(neighbors: usize, responder: F) -> Arc<Self>
    where
        F: Fn(&str) -> Result<QueryAnswer, EndpointError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            neighbors,
            validated: Mutex::new(Vec::new()),
        })
    }

    pub fn validated(&self) -> Vec<String> {
        self.validated.lock().clone()
    }
}

#[async_trait]
impl SparqlEndpoint for FakeEndpoint {
    async fn query(&self, sparql: &str) -> Result<QueryAnswer, EndpointError> {
        if sparql.contains("?neighborLabel") {
            let rows = (0..self.neighbors)
                .map(|i| {
                    let mut row = Solution::new();
                    row.insert("property".into(), RdfTerm::uri("http://dbpedia.org/ontology/country"));
                    row.insert(
                        "neighbor".into(),
                        RdfTerm::uri(format!("http://dbpedia.org/resource/Neighbor_{i}")),
                    );
                    row
                })
                .collect();
            return Ok(QueryAnswer::Bindings(rows));
        }
        self.validated.lock().push(sparql.to_string());
        (self.responder)(sparql)
    }
}

pub fn one_row() -> QueryAnswer {
    let mut row = Solution::new();
    row.insert("p".into(), RdfTerm::literal("2165423", None));
    QueryAnswer::Bindings(vec![row])
}

pub async fn small_index() -> Arc<RetrievalIndex> {
    let exemplars = vec![
        Exemplar {
            id: "1".into(),
            question: "How many inhabitants does Berlin have?".into(),
            query: "SELECT ?p WHERE { <http://dbpedia.org/resource/Berlin> <http://dbpedia.org/ontology/populationTotal> ?p }".into(),
            dataset: "qald".into(),
            languages: Some(vec!["en".into()]),
        },
        Exemplar {
            id: "2".into(),
            question: "Who wrote The God Delusion?".into(),
            query: "SELECT ?a WHERE { <http://dbpedia.org/resource/The_God_Delusion> <http://dbpedia.org/ontology/author> ?a }".into(),
            dataset: "lc_quad".into(),
            languages: None,
        },
    ];
    Arc::new(
        RetrievalIndex::build(exemplars, Arc::new(TokenHashEmbedder::default()))
            .await
            .unwrap(),
    )
}

pub const PARIS_QUERY: &str =
    "SELECT ?p WHERE { <http://dbpedia.org/resource/Paris> <http://dbpedia.org/ontology/populationTotal> ?p }";

pub fn fenced_generation(query: &str) -> String {
    format!("Thought Process: population of a city.\nSPARQL:\n```sparql\n{query}\n```")
}
