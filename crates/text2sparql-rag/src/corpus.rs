//! Exemplar corpus ingestion (boundary adapter).
//!
//! Two on-disk shapes are understood:
//!
//! - QALD: a top-level object with a `questions` array; each question carries
//!   a multilingual `question` list and a `query.sparql` string.
//! - LC-QuAD: a top-level array of objects keyed by `_id`, with
//!   `corrected_question` and `sparql_query`.
//!
//! Both are flattened into [`Exemplar`] records. Nothing downstream of this
//! module knows which format a record came from except through its dataset tag.

use crate::{Exemplar, RagError};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

pub const QALD_DATASET: &str = "qald";
pub const LC_QUAD_DATASET: &str = "lc_quad";

#[derive(Debug, Deserialize)]
struct QaldFile {
    questions: Vec<QaldQuestion>,
}

#[derive(Debug, Deserialize)]
struct QaldQuestion {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    question: Vec<QaldQuestionString>,
    #[serde(default)]
    query: Option<QaldQuery>,
}

#[derive(Debug, Deserialize)]
struct QaldQuestionString {
    language: String,
    string: String,
}

#[derive(Debug, Default, Deserialize)]
struct QaldQuery {
    #[serde(default)]
    sparql: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LcQuadItem {
    #[serde(rename = "_id")]
    id: Value,
    #[serde(default)]
    corrected_question: Option<String>,
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    sparql_query: Option<String>,
}

fn id_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Load and flatten every corpus file, in order.
pub fn load_corpus<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<Exemplar>, RagError> {
    let mut out = Vec::new();
    for path in paths {
        out.extend(load_corpus_file(path.as_ref())?);
    }
    Ok(out)
}

pub fn load_corpus_file(path: &Path) -> Result<Vec<Exemplar>, RagError> {
    let text = std::fs::read_to_string(path).map_err(|source| RagError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let value: Value = serde_json::from_str(&text).map_err(|source| RagError::Json {
        path: path.display().to_string(),
        source,
    })?;
    let exemplars = exemplars_from_value(value, &path.display().to_string())?;
    info!(path = %path.display(), count = exemplars.len(), "loaded exemplar corpus");
    Ok(exemplars)
}

/// Flatten an already-parsed corpus document. `source` is only used in errors.
pub fn exemplars_from_value(value: Value, source: &str) -> Result<Vec<Exemplar>, RagError> {
    let is_qald = value
        .as_object()
        .is_some_and(|map| map.contains_key("questions"));
    if is_qald {
        let file: QaldFile = serde_json::from_value(value).map_err(|e| {
            RagError::CorpusShape(format!("{source}: malformed QALD document: {e}"))
        })?;
        return Ok(file.questions.into_iter().filter_map(qald_exemplar).collect());
    }

    match value {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter(|item| item.get("_id").is_some())
            .filter_map(|item| match serde_json::from_value::<LcQuadItem>(item) {
                Ok(item) => lc_quad_exemplar(item),
                Err(e) => {
                    debug!(source, error = %e, "skipping malformed LC-QuAD item");
                    None
                }
            })
            .collect()),
        _ => Err(RagError::CorpusShape(format!(
            "{source}: expected a QALD object with `questions` or an LC-QuAD array"
        ))),
    }
}

fn qald_exemplar(q: QaldQuestion) -> Option<Exemplar> {
    let id = id_string(&q.id);
    let question = q
        .question
        .iter()
        .find(|s| s.language == "en")
        .or_else(|| q.question.first())
        .map(|s| s.string.trim().to_string())
        .filter(|s| !s.is_empty());
    let Some(question) = question else {
        debug!(id = %id, "skipping QALD question without text");
        return None;
    };
    Some(Exemplar {
        id,
        question,
        query: q.query.and_then(|qq| qq.sparql).unwrap_or_default(),
        dataset: QALD_DATASET.to_string(),
        languages: Some(q.question.into_iter().map(|s| s.language).collect()),
    })
}

fn lc_quad_exemplar(item: LcQuadItem) -> Option<Exemplar> {
    let id = id_string(&item.id);
    let question = item
        .corrected_question
        .or(item.question)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let Some(question) = question else {
        debug!(id = %id, "skipping LC-QuAD item without text");
        return None;
    };
    Some(Exemplar {
        id,
        question,
        query: item.sparql_query.unwrap_or_default(),
        dataset: LC_QUAD_DATASET.to_string(),
        languages: None,
    })
}
