//! Retrieval-augmented context for SPARQL generation.
//!
//! A [`RetrievalIndex`] holds normalized [`Exemplar`] records (question /
//! query pairs from QALD and LC-QuAD style corpora) next to a flat table of
//! embedding vectors. It is built once, then shared read-only (`Arc`) by any
//! number of concurrent pipeline executions.
//!
//! Scoring mirrors a brute-force L2 index: `score = 1 - d²` where `d²` is the
//! squared Euclidean distance between query and stored vector. The score is a
//! ranking key, not a calibrated probability; it is unbounded below.

pub mod corpus;
pub mod embeddings_file;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use text2sparql_llm::{EmbedError, Embedder};
use tracing::{debug, info};

pub use embeddings_file::{EmbeddingsFileV1, EMBEDDINGS_FILE_VERSION_V1};

/// Language that needs no filtering.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Texts per embedder call while building.
const BUILD_BATCH: usize = 64;

// ============================================================================
// Types
// ============================================================================

/// One stored question/query pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exemplar {
    pub id: String,
    pub question: String,
    /// May be empty (some QALD entries ship without a query).
    pub query: String,
    pub dataset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub exemplar: Exemplar,
    pub score: f32,
}

/// Parameters of one similarity search.
#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    pub text: String,
    pub top_k: usize,
    pub threshold: Option<f32>,
    pub dataset: Option<String>,
    pub language: String,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            top_k: 3,
            threshold: None,
            dataset: None,
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = Some(dataset.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    fn accepts(&self, exemplar: &Exemplar, score: f32) -> bool {
        if self.threshold.is_some_and(|t| score < t) {
            return false;
        }
        if let Some(ds) = &self.dataset {
            if !exemplar.dataset.eq_ignore_ascii_case(ds) {
                return false;
            }
        }
        if self.language != DEFAULT_LANGUAGE {
            match &exemplar.languages {
                Some(langs) if langs.iter().any(|l| l == &self.language) => {}
                _ => return false,
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetInfo {
    pub size: usize,
    pub description: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("embedding failed: {0}")]
    Embed(#[from] EmbedError),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedder returned {actual} vectors for {expected} texts")]
    CountMismatch { expected: usize, actual: usize },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unrecognized corpus shape: {0}")]
    CorpusShape(String),

    #[error("embeddings file CBOR error: {0}")]
    Cbor(String),

    #[error("unsupported embeddings file version: {found} (expected {})", EMBEDDINGS_FILE_VERSION_V1)]
    Version { found: String },

    #[error("embeddings file is stale: {0}")]
    StaleEmbeddings(String),
}

// ============================================================================
// Index
// ============================================================================

/// Flat (brute-force) L2 index over exemplar question embeddings.
pub struct RetrievalIndex {
    exemplars: Vec<Exemplar>,
    /// Row-major, `exemplars.len() * dim` floats.
    vectors: Vec<f32>,
    dim: usize,
    embedder: Arc<dyn Embedder>,
}

impl std::fmt::Debug for RetrievalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalIndex")
            .field("len", &self.exemplars.len())
            .field("dim", &self.dim)
            .field("backend", &self.embedder.backend())
            .field("model", &self.embedder.model())
            .finish()
    }
}

impl RetrievalIndex {
    /// Embed every exemplar question and build the index.
    pub async fn build(
        exemplars: Vec<Exemplar>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, RagError> {
        let mut rows: Vec<Vec<f32>> = Vec::with_capacity(exemplars.len());
        for batch in exemplars.chunks(BUILD_BATCH) {
            let texts: Vec<String> = batch.iter().map(|e| e.question.clone()).collect();
            let vectors = embedder.embed(&texts).await?;
            if vectors.len() != texts.len() {
                return Err(RagError::CountMismatch {
                    expected: texts.len(),
                    actual: vectors.len(),
                });
            }
            rows.extend(vectors);
            debug!(done = rows.len(), total = exemplars.len(), "embedded exemplar batch");
        }
        let index = Self::from_rows(exemplars, rows, embedder)?;
        info!(
            exemplars = index.len(),
            dim = index.dim,
            backend = index.embedder.backend(),
            "built retrieval index"
        );
        Ok(index)
    }

    /// Assemble an index from precomputed vectors (one per exemplar, same order).
    pub fn from_rows(
        exemplars: Vec<Exemplar>,
        rows: Vec<Vec<f32>>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, RagError> {
        if rows.len() != exemplars.len() {
            return Err(RagError::CountMismatch {
                expected: exemplars.len(),
                actual: rows.len(),
            });
        }
        let dim = rows.first().map(Vec::len).unwrap_or(0);
        let mut vectors = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            if row.len() != dim {
                return Err(RagError::DimensionMismatch {
                    expected: dim,
                    actual: row.len(),
                });
            }
            vectors.extend(row);
        }
        Ok(Self {
            exemplars,
            vectors,
            dim,
            embedder,
        })
    }

    pub fn len(&self) -> usize {
        self.exemplars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exemplars.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn exemplars(&self) -> &[Exemplar] {
        &self.exemplars
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Stored vector of exemplar `i`.
    pub fn vector(&self, i: usize) -> Option<&[f32]> {
        if i >= self.exemplars.len() || self.dim == 0 {
            return None;
        }
        Some(&self.vectors[i * self.dim..(i + 1) * self.dim])
    }

    /// Embed the query text, then search.
    pub async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<RetrievalResult>, RagError> {
        if self.is_empty() || query.top_k == 0 {
            return Ok(Vec::new());
        }
        let mut vectors = self.embedder.embed(std::slice::from_ref(&query.text)).await?;
        let Some(vector) = vectors.pop() else {
            return Err(RagError::CountMismatch {
                expected: 1,
                actual: 0,
            });
        };
        self.retrieve_with_vector(&vector, query)
    }

    /// Search with a precomputed query vector.
    ///
    /// The `top_k` nearest rows are taken first; threshold, dataset and
    /// language filters then apply to those rows only, so fewer than `top_k`
    /// results may come back.
    pub fn retrieve_with_vector(
        &self,
        vector: &[f32],
        query: &RetrievalQuery,
    ) -> Result<Vec<RetrievalResult>, RagError> {
        if self.is_empty() || self.dim == 0 || query.top_k == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != self.dim {
            return Err(RagError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }

        let mut nearest: Vec<(usize, f32)> = self
            .vectors
            .par_chunks(self.dim)
            .enumerate()
            .map(|(i, row)| (i, squared_l2(vector, row)))
            .collect();
        nearest.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        nearest.truncate(query.top_k);

        let mut results: Vec<RetrievalResult> = nearest
            .into_iter()
            .filter_map(|(i, dist)| {
                let exemplar = &self.exemplars[i];
                let score = 1.0 - dist;
                query.accepts(exemplar, score).then(|| RetrievalResult {
                    exemplar: exemplar.clone(),
                    score,
                })
            })
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(results)
    }

    /// `retrieve` followed by [`render_context`].
    pub async fn context_for(&self, query: &RetrievalQuery) -> Result<String, RagError> {
        Ok(render_context(&self.retrieve(query).await?))
    }

    /// Per-dataset exemplar counts.
    pub fn datasets_info(&self) -> BTreeMap<String, DatasetInfo> {
        datasets_info(&self.exemplars)
    }
}

/// Per-dataset counts; the two known formats are always listed.
pub fn datasets_info(exemplars: &[Exemplar]) -> BTreeMap<String, DatasetInfo> {
    let mut out: BTreeMap<String, DatasetInfo> = BTreeMap::new();
    for tag in [corpus::QALD_DATASET, corpus::LC_QUAD_DATASET] {
        out.insert(
            tag.to_string(),
            DatasetInfo {
                size: 0,
                description: dataset_description(tag).to_string(),
            },
        );
    }
    for e in exemplars {
        out.entry(e.dataset.clone())
            .or_insert_with(|| DatasetInfo {
                size: 0,
                description: dataset_description(&e.dataset).to_string(),
            })
            .size += 1;
    }
    out
}

fn dataset_description(tag: &str) -> &'static str {
    match tag {
        corpus::QALD_DATASET => "QALD dataset with multilingual questions and SPARQL queries",
        corpus::LC_QUAD_DATASET => "LC-QuAD dataset with English questions and SPARQL templates",
        _ => "custom exemplar dataset",
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Few-shot block: one `Question:` / `SPARQL:` pair per result, blank-line
/// separated. Results with an empty query contribute only their question.
pub fn render_context(results: &[RetrievalResult]) -> String {
    let mut out = String::new();
    for r in results {
        out.push_str("Question: ");
        out.push_str(&r.exemplar.question);
        out.push('\n');
        if !r.exemplar.query.is_empty() {
            out.push_str("SPARQL: ");
            out.push_str(&r.exemplar.query);
            out.push('\n');
        }
        out.push('\n');
    }
    out.trim().to_string()
}
