//! Prompt text for every generative call the pipeline makes.
//!
//! Templates that have a dedicated parser in [`crate::parsing`] must keep their
//! marker strings in sync with it: [`EXTRACTION_PREAMBLE`],
//! [`INTERMEDIARY_MARKER`], [`SPARQL_MARKER`], [`CORRECTED_MARKER`] and
//! [`INVALID_INPUT`].

use crate::parsing::TaggedEntity;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// First words of a well-formed extraction reply.
pub const EXTRACTION_PREAMBLE: &str = "Let's think step by step.";
/// Line prefix carrying the tagged question in an extraction reply.
pub const INTERMEDIARY_MARKER: &str = "So the intermediary_question is:";
/// Marker preceding the query in a generation reply.
pub const SPARQL_MARKER: &str = "SPARQL:";
/// Marker preceding the query in a correction reply.
pub const CORRECTED_MARKER: &str = "CORRECTED SPARQL:";
/// Sentinel a generation reply may use instead of a query.
pub const INVALID_INPUT: &str = "INVALID_INPUT";

// ============================================================================
// Normalization
// ============================================================================

pub const TRANSLATE_SYSTEM: &str = "You are a precise translation engine. Translate the input into English. \
Keep every named entity (people, places, titles, organisations) exactly as written, keep technical terms, \
and keep the question structure. Reply with the translation only, no commentary.";

pub fn translate_user(text: &str) -> String {
    format!("Translate this to English exactly:\n\n{text}")
}

pub const CLARIFY_SYSTEM: &str = "You prepare questions for translation into SPARQL. \
Change the question as little as possible. If it is already unambiguous, repeat it unchanged. \
Reply with the clarified question only, never with the original next to it.";

pub fn clarify_user(question: &str) -> String {
    format!(
        "Clarify the question below so it can be translated into a SPARQL query without guessing. \
Disambiguate place and entity names, add missing context, correct wrong assumptions.\n\n\
QUESTION: {question}\n\n\
Examples:\n\
1) Input: \"Washington is the capital of what country?\"\n\
   Output: \"Washington, D.C. is the capital of what country?\"\n\
2) Input: \"Apple revenue in 2020.\"\n\
   Output: \"What was the revenue of Apple Inc. in 2020?\"\n\
3) Input: \"Who was the USA president during WWII?\"\n\
   Output: \"Who was the president of the United States during World War II?\""
    )
}

// ============================================================================
// Generative entity extraction (fallback linker)
// ============================================================================

pub const EXTRACTION_SYSTEM: &str = "You are a named entity recognizer for questions over DBpedia. \
Answer every question with exactly this four-line template and nothing else:\n\n\
Let's think step by step. In the question \"<question>\", we are asked: \"<paraphrase>\".\n\
so we need to identify: <entity kinds>.\n\
The entities are: <concrete entities>.\n\
So the intermediary_question is: <question with every class, property and entity wrapped in angle brackets>";

const EXTRACTION_EXAMPLES: &str = r#"Examples:

Input: "Who are the parents of Ozzy Osbourne and Kelly Osbourne?"
Output:
Let's think step by step. In the question "Who are the parents of Ozzy Osbourne and Kelly Osbourne?", we are asked: "find the parents shared by Ozzy Osbourne and Kelly Osbourne".
so we need to identify: parent, person.
The entities are: Ozzy Osbourne, Kelly Osbourne.
So the intermediary_question is: Who are the <parents> of <Ozzy Osbourne> and <Kelly Osbourne>?

Input: "Which river flows through Vienna?"
Output:
Let's think step by step. In the question "Which river flows through Vienna?", we are asked: "find rivers whose course passes Vienna".
so we need to identify: river, city.
The entities are: Vienna.
So the intermediary_question is: Which <river> <flows through> <Vienna>?

Input: "What is the allegiance of John Kotelawala?"
Output:
Let's think step by step. In the question "What is the allegiance of John Kotelawala?", we are asked: "find the political allegiance of John Kotelawala".
so we need to identify: allegiance, person.
The entities are: John Kotelawala.
So the intermediary_question is: What is the <allegiance> of <John Kotelawala>?

Rules:
- Keep the template punctuation and line order exactly.
- Keep the original capitalization of entity names.
- A tag may name the kind of its value, e.g. <person>Ada Lovelace</person>.
- Never add explanations outside the template."#;

pub fn extraction_user(question: &str) -> String {
    format!("{EXTRACTION_EXAMPLES}\n\nQuestion: {question}\nProvide output in the exact required format:")
}

pub const URI_SYSTEM: &str = "You map tagged entities of a DBpedia question to DBpedia URIs. \
Output one line per tag in the form `- <tag> : full_uri` and nothing else.\n\
Resources (named things) use http://dbpedia.org/resource/Exact_Name with original capitalization, \
underscores for spaces and punctuation kept. Classes use http://dbpedia.org/ontology/ProperCase in singular. \
Properties prefer http://dbpedia.org/ontology/camelCase and fall back to http://dbpedia.org/property/ only \
when no ontology property exists.";

pub fn uri_user(tagged_question: &str, entities: &[TaggedEntity]) -> String {
    let mut listing = String::new();
    for e in entities {
        let _ = writeln!(listing, "- {} ({})", e.value, e.entity_type);
    }
    format!(
        "Example:\n\
Tagged question: Which <river> has <source place> <Australian Alps>?\n\
Output:\n\
- <river> : http://dbpedia.org/ontology/River\n\
- <source place> : http://dbpedia.org/ontology/sourcePlace\n\
- <Australian Alps> : http://dbpedia.org/resource/Australian_Alps\n\n\
Tagged question: {tagged_question}\n\
Entities:\n{listing}\n\
DBpedia URIs:"
    )
}

// ============================================================================
// Generation, correction, repair
// ============================================================================

pub const GENERATION_SYSTEM: &str = "You generate SPARQL queries for DBpedia.\n\
1. Use every provided URI exactly as given; never alter it.\n\
2. You may add a property or class URI only when it is essential and obvious from standard DBpedia \
patterns (e.g. dbo:birthDate for a person). Never invent entity (resource) URIs.\n\
3. Choose SELECT or ASK to match the question; add DISTINCT when duplicates are possible.\n\
4. Start with a short 'Thought Process:' section, then write a line containing only `SPARQL:` \
followed by the query in a ```sparql code block.\n\
5. If a critical entity URI is missing or the question cannot be answered, reply with INVALID_INPUT instead. \
Prefer a working query over INVALID_INPUT.";

/// Everything the generation prompt is assembled from.
pub struct GenerationInput<'a> {
    pub question: &'a str,
    pub tagged_question: &'a str,
    pub uri_bindings: &'a BTreeMap<String, String>,
    pub neighbor_uris: &'a [String],
    pub retrieved_context: &'a str,
}

pub fn uri_listing(bindings: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, uri) in bindings {
        let _ = writeln!(out, "- <{key}> : {uri}");
    }
    out.trim_end().to_string()
}

pub fn generation_user(input: &GenerationInput<'_>) -> String {
    format!(
        "Original Question: \"{}\"\n\
Question with Entities: \"{}\"\n\
DBpedia URIs:\n{}\n\
DBpedia neighbors:\n{}\n\
Similar questions with their correct SPARQL:\n{}",
        input.question,
        input.tagged_question,
        uri_listing(input.uri_bindings),
        input.neighbor_uris.join(" "),
        input.retrieved_context,
    )
}

pub const CORRECTION_SYSTEM: &str = "You are a SPARQL error correction expert. Given a failed generation attempt, \
list every problem, then return a working SPARQL query that uses only the provided URIs.";

pub fn correction_user(
    question: &str,
    tagged_question: &str,
    bindings: &BTreeMap<String, String>,
    failed_reply: &str,
) -> String {
    format!(
        "Analyze and fix this failed SPARQL generation.\n\n\
Original Question: \"{question}\"\n\
Tagged Question: \"{tagged_question}\"\n\
Provided URIs:\n{}\n\n\
Failed attempt:\n{failed_reply}\n\n\
Reply in exactly this format:\n\n\
ANALYSIS:\n\
1. <issue>\n\
2. <issue>\n\n\
{CORRECTED_MARKER}\n\
<the corrected query>",
        uri_listing(bindings)
    )
}

pub const REPAIR_SYSTEM: &str = "You repair SPARQL queries.\n\
For empty results: look for alternative URIs with the same meaning, prefer dbo: over dbp:, \
try superclasses or related properties, and alternative resource names or redirects.\n\
For syntax errors: fix exactly what is broken and leave working clauses untouched.\n\
Output only the fixed query.";

/// Everything the repair prompt is assembled from.
pub struct RepairInput<'a> {
    pub query: &'a str,
    pub diagnostic: &'a str,
    pub question: &'a str,
    pub tagged_question: &'a str,
    pub uri_bindings: &'a BTreeMap<String, String>,
}

pub fn repair_user(input: &RepairInput<'_>) -> String {
    let mut uris = String::new();
    for (k, v) in input.uri_bindings {
        let _ = writeln!(uris, "- {k}: {v}");
    }
    format!(
        "Fix this SPARQL query based on the execution error while preserving its intent.\n\n\
Error: {}\n\n\
Query:\n{}\n\n\
Context:\n\
- Question: {}\n\
- Tagged: {}\n\
- URIs:\n{}\n\
Output ONLY the corrected SPARQL query with no additional text:",
        input.diagnostic,
        input.query,
        input.question,
        input.tagged_question,
        uris.trim_end(),
    )
}
