use colored::Colorize;
use std::fmt::Write;
use text2sparql_pipeline::{PipelineResult, Provenance, Status};

/// Human-readable rendering of one pipeline result.
pub fn render_result(result: &PipelineResult) -> String {
    let mut out = String::new();
    let status = match result.status {
        Status::Success => "success".green().bold(),
        Status::Error => "error".red().bold(),
    };
    let _ = writeln!(out, "{} {}", status, result.request_id.dimmed());

    if let Some(n) = &result.normalized {
        if n.english != result.question {
            let _ = writeln!(out, "{:<10} {}", "english", n.english);
        }
        if n.rewritten != n.english {
            let _ = writeln!(out, "{:<10} {}", "rewritten", n.rewritten);
        }
    }
    if let Some(tagged) = &result.tagged_question {
        let strategy = result.linking_strategy.as_deref().unwrap_or("-");
        let _ = writeln!(out, "{:<10} {} ({})", "tagged", tagged, strategy);
    }
    for (key, uri) in &result.uri_bindings {
        let _ = writeln!(out, "  {} → {}", key, uri);
    }

    if let Some(sparql) = &result.sparql {
        let origin = match result.provenance {
            Some(Provenance::Repair(n)) => format!("repair #{n}"),
            _ => "initial".to_string(),
        };
        let _ = writeln!(
            out,
            "{:<10} {} validation(s), {}",
            "sparql",
            result.validations,
            origin
        );
        let _ = writeln!(out, "{sparql}");
    }

    if let Some(error) = &result.error {
        let _ = writeln!(out, "{} [{}] {}", "error:".red().bold(), error.kind, error.message);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use text2sparql_pipeline::pipeline::ErrorInfo;

    fn result(status: Status) -> PipelineResult {
        PipelineResult {
            request_id: "req-1".into(),
            status,
            question: "What is the population of Paris?".into(),
            normalized: None,
            tagged_question: Some("What is the population of <Paris>?".into()),
            uri_bindings: BTreeMap::from([(
                "Paris".to_string(),
                "http://dbpedia.org/resource/Paris".to_string(),
            )]),
            sparql: Some("SELECT ?p WHERE { ?s ?q ?p }".into()),
            provenance: Some(Provenance::Repair(1)),
            linking_strategy: Some("annotation".into()),
            validations: 2,
            error: None,
        }
    }

    #[test]
    fn success_lists_bindings_and_query() {
        colored::control::set_override(false);
        let text = render_result(&result(Status::Success));
        assert!(text.starts_with("success req-1"));
        assert!(text.contains("Paris → http://dbpedia.org/resource/Paris"));
        assert!(text.contains("2 validation(s), repair #1"));
        assert!(text.contains("SELECT ?p WHERE"));
        assert!(!text.contains("error:"));
    }

    #[test]
    fn failure_shows_error_kind() {
        colored::control::set_override(false);
        let mut r = result(Status::Error);
        r.error = Some(ErrorInfo {
            kind: "repair_exhausted".into(),
            message: "repair exhausted after 3 validation(s): empty".into(),
        });
        let text = render_result(&r);
        assert!(text.contains("error: [repair_exhausted]"));
    }
}
