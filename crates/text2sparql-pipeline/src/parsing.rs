//! Parsers for generative-model replies.
//!
//! One function per reply template. A reply that does not match its template
//! yields an explicit failure (`None` / `Err`), never a best-effort guess.

use crate::prompts::{
    CORRECTED_MARKER, EXTRACTION_PREAMBLE, INTERMEDIARY_MARKER, INVALID_INPUT, SPARQL_MARKER,
};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

// Patterns are constants; a compile failure is a programming error.
fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("invalid built-in regex"))
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```")
}

/// `<type>value</type>` or a plain `<value>`.
fn span_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"<([^<>/]+)>(?:([^<>]+)</([^<>]+)>)?")
}

fn clarify_note_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"(?s)\s*\(\s*Clarify:[^()]*\)\s*$")
}

fn endpoint_echo_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"(?m)Endpoint returned:.*$")
}

/// Body of the first fenced code block, or the whole text when unfenced.
pub fn unwrap_fence(text: &str) -> &str {
    match fence_re().captures(text).and_then(|c| c.get(1)) {
        Some(body) => body.as_str(),
        None => text,
    }
}

/// Normalize a candidate query: unwrap a code fence, drop full-line `#`
/// comments, trim. `None` when nothing is left.
pub fn postprocess_query(text: &str) -> Option<String> {
    let body = unwrap_fence(text);
    let kept: Vec<&str> = body
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect();
    let query = kept.join("\n").trim().to_string();
    (!query.is_empty()).then_some(query)
}

/// Outcome of parsing a generation reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationReply {
    Query(String),
    /// The model answered with the invalid-input sentinel.
    InvalidInput,
    /// No query marker; needs a correction call.
    Unparsed,
}

/// Take the text after the last `SPARQL:` marker.
pub fn parse_generation(reply: &str) -> GenerationReply {
    let Some(pos) = reply.rfind(SPARQL_MARKER) else {
        if reply.trim() == INVALID_INPUT {
            return GenerationReply::InvalidInput;
        }
        return GenerationReply::Unparsed;
    };
    let tail = &reply[pos + SPARQL_MARKER.len()..];
    match postprocess_query(tail) {
        Some(q) if q == INVALID_INPUT => GenerationReply::InvalidInput,
        Some(q) => GenerationReply::Query(q),
        None => GenerationReply::Unparsed,
    }
}

/// Query from a correction reply: the `CORRECTED SPARQL:` section, else the
/// first ```sparql fenced block.
pub fn parse_correction(reply: &str) -> Option<String> {
    if let Some(pos) = reply.find(CORRECTED_MARKER) {
        if let Some(q) = postprocess_query(&reply[pos + CORRECTED_MARKER.len()..]) {
            if q != INVALID_INPUT {
                return Some(q);
            }
        }
    }
    let pos = reply.find("```sparql")?;
    postprocess_query(&reply[pos..]).filter(|q| q != INVALID_INPUT)
}

/// Type of a span tagged without one, e.g. `<Paris>`.
pub const UNTYPED_ENTITY: &str = "thing";

/// One `<…>` span of a tagged question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEntity {
    pub value: String,
    /// Tag name of `<type>value</type>`, [`UNTYPED_ENTITY`] for `<value>`.
    pub entity_type: String,
}

/// A well-formed generative extraction reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionReply {
    pub tagged_question: String,
    /// Tagged spans in order of appearance, de-duplicated by value.
    pub entities: Vec<TaggedEntity>,
}

pub fn parse_extraction(reply: &str) -> Result<ExtractionReply, String> {
    let reply = reply.trim();
    if !reply.starts_with(EXTRACTION_PREAMBLE) {
        return Err("reply does not start with the reasoning preamble".to_string());
    }
    let tagged_question = reply
        .lines()
        .find_map(|line| {
            line.trim()
                .strip_prefix(INTERMEDIARY_MARKER)
                .map(|rest| rest.trim().to_string())
        })
        .filter(|t| !t.is_empty())
        .ok_or_else(|| "reply has no intermediary question line".to_string())?;

    Ok(ExtractionReply {
        entities: tagged_spans(&tagged_question),
        tagged_question,
    })
}

/// Spans of a tagged question. `<type>value</type>` yields `value` typed
/// `type`; a plain `<value>` is untyped. The first type seen for a value wins.
pub fn tagged_spans(tagged: &str) -> Vec<TaggedEntity> {
    let mut out: Vec<TaggedEntity> = Vec::new();
    for c in span_re().captures_iter(tagged) {
        let Some(open) = c.get(1) else { continue };
        let (value, entity_type) = match (c.get(2), c.get(3)) {
            (Some(value), Some(close)) if close.as_str().trim() == open.as_str().trim() => {
                (value.as_str(), open.as_str().trim())
            }
            _ => (open.as_str(), UNTYPED_ENTITY),
        };
        let value = value.trim();
        if value.is_empty() || out.iter().any(|e| e.value == value) {
            continue;
        }
        out.push(TaggedEntity {
            value: value.to_string(),
            entity_type: entity_type.to_string(),
        });
    }
    out
}

/// Parse `key : uri` lines. Keys lose list markers and angle brackets; lines
/// whose value is not an http(s) URI are skipped.
pub fn parse_uri_lines(reply: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for line in reply.lines() {
        let line = line.trim().trim_start_matches(['-', '*']).trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().trim_start_matches('<').trim_end_matches('>').trim();
        let value = value
            .trim()
            .trim_matches('`')
            .trim_start_matches('<')
            .trim_end_matches(['>', ',', ';'])
            .trim();
        if key.is_empty() || !looks_like_http_uri(value) {
            continue;
        }
        out.insert(key.to_string(), value.to_string());
    }
    out
}

fn looks_like_http_uri(value: &str) -> bool {
    url::Url::parse(value)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

/// Clarification reply without surrounding quotes or a trailing
/// `(Clarify: …)` note. `None` when nothing is left.
pub fn clean_clarification(reply: &str) -> Option<String> {
    let stripped = clarify_note_re().replace(reply.trim(), "");
    let text = stripped
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '\u{201c}' | '\u{201d}'))
        .trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Endpoint error text without the echoed endpoint response and query.
pub fn clean_endpoint_message(message: &str) -> String {
    let mut text = endpoint_echo_re().replace_all(message, "").into_owned();
    if let Some(pos) = text.find("SPARQL query:") {
        text.truncate(pos);
    }
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_patterns_compile() {
        assert!(fence_re().is_match("```\nASK {}\n```"));
        assert!(span_re().is_match("<Paris>"));
        assert!(clarify_note_re().is_match("Q? (Clarify: x)"));
        assert!(endpoint_echo_re().is_match("Endpoint returned: b''"));
    }

    #[test]
    fn postprocess_unwraps_fence_and_drops_comments() {
        let raw = "```sparql\n# population lookup\nSELECT ?p WHERE {\n  <http://dbpedia.org/resource/Paris> <http://dbpedia.org/ontology/populationTotal> ?p .\n}\n```";
        let q = postprocess_query(raw).unwrap();
        assert!(q.starts_with("SELECT ?p WHERE {"));
        assert!(!q.contains('#'));
        assert_eq!(postprocess_query("```\n# only a comment\n```"), None);
        assert_eq!(postprocess_query("   "), None);
    }

    #[test]
    fn generation_uses_last_marker() {
        let reply = "Thought Process: the answer needs SPARQL: a SELECT.\nSPARQL:\n```sparql\nSELECT ?x WHERE { ?x a ?y }\n```";
        assert_eq!(
            parse_generation(reply),
            GenerationReply::Query("SELECT ?x WHERE { ?x a ?y }".into())
        );
        assert_eq!(parse_generation("INVALID_INPUT"), GenerationReply::InvalidInput);
        assert_eq!(parse_generation("SPARQL: INVALID_INPUT"), GenerationReply::InvalidInput);
        assert_eq!(
            parse_generation("```sparql\nSELECT * {}\n```"),
            GenerationReply::Unparsed
        );
    }

    #[test]
    fn correction_prefers_marker_then_fence() {
        let marked = "ANALYSIS:\n1. missing prefix\n\nCORRECTED SPARQL:\nASK { ?s ?p ?o }";
        assert_eq!(parse_correction(marked).as_deref(), Some("ASK { ?s ?p ?o }"));

        let fenced = "ANALYSIS: wrong var\n```sparql\nSELECT ?a WHERE { ?a ?b ?c }\n```\nthanks";
        assert_eq!(
            parse_correction(fenced).as_deref(),
            Some("SELECT ?a WHERE { ?a ?b ?c }")
        );
        assert_eq!(parse_correction("I cannot help with that."), None);
    }

    #[test]
    fn extraction_requires_preamble_and_marker() {
        let ok = "Let's think step by step. In the question \"Who wrote Dune?\", we are asked: \"find author\".\n\
so we need to identify: author, book.\n\
The entities are: Dune.\n\
So the intermediary_question is: Who is the <author> of <Dune>?";
        let parsed = parse_extraction(ok).unwrap();
        assert_eq!(parsed.tagged_question, "Who is the <author> of <Dune>?");
        let values: Vec<_> = parsed.entities.iter().map(|e| e.value.as_str()).collect();
        assert_eq!(values, vec!["author", "Dune"]);
        assert!(parsed.entities.iter().all(|e| e.entity_type == UNTYPED_ENTITY));

        assert!(parse_extraction("So the intermediary_question is: <x>").is_err());
        assert!(parse_extraction("Let's think step by step. No marker here.").is_err());
    }

    #[test]
    fn typed_spans_keep_their_type() {
        let spans = tagged_spans("Who is the <relation>spouse</relation> of <person>Ada Lovelace</person> in <city>?");
        let pairs: Vec<_> = spans
            .iter()
            .map(|e| (e.value.as_str(), e.entity_type.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![("spouse", "relation"), ("Ada Lovelace", "person"), ("city", "thing")]
        );
    }

    #[test]
    fn mismatched_closing_tag_is_untyped() {
        let spans = tagged_spans("Where was <person>Gauss</place> born?");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].value, "person");
        assert_eq!(spans[0].entity_type, UNTYPED_ENTITY);
    }

    #[test]
    fn repeated_value_keeps_first_type() {
        let spans = tagged_spans("<city>Paris</city> or <Paris>?");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].entity_type, "city");
    }

    #[test]
    fn uri_lines_skip_malformed_entries() {
        let reply = "- <river> : http://dbpedia.org/ontology/River\n\
* source place: <http://dbpedia.org/ontology/sourcePlace>\n\
garbage line\n\
- <Goolwa> : not a uri\n\
- <Australian Alps> : http://dbpedia.org/resource/Australian_Alps";
        let uris = parse_uri_lines(reply);
        assert_eq!(uris.len(), 3);
        assert_eq!(uris["river"], "http://dbpedia.org/ontology/River");
        assert_eq!(uris["source place"], "http://dbpedia.org/ontology/sourcePlace");
        assert!(!uris.contains_key("Goolwa"));
    }

    #[test]
    fn clarification_cleanup() {
        assert_eq!(
            clean_clarification("\"Washington, D.C. is the capital of what country?\" (Clarify: state vs. city)")
                .as_deref(),
            Some("Washington, D.C. is the capital of what country?")
        );
        assert_eq!(clean_clarification("  \"\"  "), None);
    }

    #[test]
    fn endpoint_message_cleanup() {
        let raw = "QueryBadFormed: syntax error at 'WHERE'\nEndpoint returned: b'Virtuoso 37000 Error'\n\nSPARQL query:\nSELECT";
        assert_eq!(clean_endpoint_message(raw), "QueryBadFormed: syntax error at 'WHERE'");
    }
}
