//! Persisted exemplar embeddings (CBOR).
//!
//! Embedding a full QALD + LC-QuAD corpus through a remote model is slow, so
//! the vectors can be written once and reloaded at startup. A file is only
//! reused when it was produced by the same backend/model and every row's text
//! digest still matches the exemplar at that position; otherwise the index is
//! rebuilt from the embedder and the file rewritten.

use crate::{Exemplar, RagError, RetrievalIndex};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use text2sparql_llm::Embedder;
use tracing::{info, warn};

pub const EMBEDDINGS_FILE_VERSION_V1: &str = "text2sparql_embeddings_v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRowV1 {
    pub exemplar_id: String,
    /// Hex SHA-256 of the embedded question text.
    pub text_digest: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsFileV1 {
    pub version: String,
    pub created_at_unix_secs: u64,
    pub backend: String,
    pub model: String,
    pub dim: usize,
    pub rows: Vec<EmbeddingRowV1>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

pub fn text_digest(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

impl EmbeddingsFileV1 {
    /// Snapshot the vectors of a built index.
    pub fn from_index(index: &RetrievalIndex) -> Self {
        let rows = index
            .exemplars()
            .iter()
            .enumerate()
            .map(|(i, e)| EmbeddingRowV1 {
                exemplar_id: e.id.clone(),
                text_digest: text_digest(&e.question),
                vector: index.vector(i).map(<[f32]>::to_vec).unwrap_or_default(),
            })
            .collect();
        let created_at_unix_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            version: EMBEDDINGS_FILE_VERSION_V1.to_string(),
            created_at_unix_secs,
            backend: index.embedder().backend().to_string(),
            model: index.embedder().model().to_string(),
            dim: index.dim(),
            rows,
            metadata: HashMap::new(),
        }
    }

    /// Check this file against the current corpus and embedder.
    pub fn check(&self, exemplars: &[Exemplar], embedder: &dyn Embedder) -> Result<(), RagError> {
        if self.backend != embedder.backend() || self.model != embedder.model() {
            return Err(RagError::StaleEmbeddings(format!(
                "file was produced by {}/{}, embedder is {}/{}",
                self.backend,
                self.model,
                embedder.backend(),
                embedder.model()
            )));
        }
        if self.rows.len() != exemplars.len() {
            return Err(RagError::StaleEmbeddings(format!(
                "file has {} rows, corpus has {} exemplars",
                self.rows.len(),
                exemplars.len()
            )));
        }
        if !self.rows.is_empty() && self.dim == 0 {
            return Err(RagError::StaleEmbeddings("file has dim=0".to_string()));
        }
        for (row, exemplar) in self.rows.iter().zip(exemplars) {
            if row.vector.len() != self.dim {
                return Err(RagError::DimensionMismatch {
                    expected: self.dim,
                    actual: row.vector.len(),
                });
            }
            if row.text_digest != text_digest(&exemplar.question) {
                return Err(RagError::StaleEmbeddings(format!(
                    "exemplar {} changed since the file was written",
                    exemplar.id
                )));
            }
        }
        Ok(())
    }

    pub fn into_rows(self) -> Vec<Vec<f32>> {
        self.rows.into_iter().map(|r| r.vector).collect()
    }
}

pub fn encode_embeddings_file_v1(file: &EmbeddingsFileV1) -> Result<Vec<u8>, RagError> {
    if file.version != EMBEDDINGS_FILE_VERSION_V1 {
        return Err(RagError::Version {
            found: file.version.clone(),
        });
    }
    let mut out = Vec::new();
    ciborium::ser::into_writer(file, &mut out).map_err(|e| RagError::Cbor(e.to_string()))?;
    Ok(out)
}

pub fn decode_embeddings_file_v1(bytes: &[u8]) -> Result<EmbeddingsFileV1, RagError> {
    let file: EmbeddingsFileV1 =
        ciborium::de::from_reader(bytes).map_err(|e| RagError::Cbor(e.to_string()))?;
    if file.version != EMBEDDINGS_FILE_VERSION_V1 {
        return Err(RagError::Version {
            found: file.version,
        });
    }
    Ok(file)
}

pub fn write_embeddings_file(path: &Path, file: &EmbeddingsFileV1) -> Result<(), RagError> {
    let bytes = encode_embeddings_file_v1(file)?;
    std::fs::write(path, bytes).map_err(|source| RagError::Io {
        path: path.display().to_string(),
        source,
    })
}

pub fn read_embeddings_file(path: &Path) -> Result<EmbeddingsFileV1, RagError> {
    let bytes = std::fs::read(path).map_err(|source| RagError::Io {
        path: path.display().to_string(),
        source,
    })?;
    decode_embeddings_file_v1(&bytes)
}

/// Reuse `path` when it is current, otherwise embed the corpus and rewrite it.
pub async fn load_or_build(
    path: &Path,
    exemplars: Vec<Exemplar>,
    embedder: Arc<dyn Embedder>,
) -> Result<RetrievalIndex, RagError> {
    if path.exists() {
        let reused = read_embeddings_file(path)
            .and_then(|file| file.check(&exemplars, embedder.as_ref()).map(|()| file));
        match reused {
            Ok(file) => {
                info!(path = %path.display(), rows = file.rows.len(), "reusing embeddings file");
                return RetrievalIndex::from_rows(exemplars, file.into_rows(), embedder);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "rebuilding embeddings"),
        }
    }

    let index = RetrievalIndex::build(exemplars, embedder).await?;
    write_embeddings_file(path, &EmbeddingsFileV1::from_index(&index))?;
    info!(path = %path.display(), rows = index.len(), "wrote embeddings file");
    Ok(index)
}
