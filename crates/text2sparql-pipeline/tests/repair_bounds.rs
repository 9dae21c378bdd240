//! Property tests for the validate/repair bound.

mod common;

use common::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use text2sparql_pipeline::prompts::REPAIR_SYSTEM;
use text2sparql_pipeline::repair::{ExhaustReason, RepairContext, RepairLoop, RepairOutcome};
use text2sparql_pipeline::{Provenance, QueryAnswer, QueryValidator, SparqlCandidate};

fn distinct_query(i: usize) -> String {
    format!("SELECT ?x WHERE {{ ?x <http://dbpedia.org/ontology/p{i}> ?y }}")
}

/// Endpoint that accepts only the query at position `valid_at` (if any).
fn run_loop(max_retries: usize, valid_at: Option<usize>) -> (RepairOutcome, usize) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    rt.block_on(async move {
        let accepted = valid_at.map(distinct_query);
        let endpoint = FakeEndpoint::new(move |q| {
            if accepted.as_deref() == Some(q) {
                Ok(one_row())
            } else {
                Ok(QueryAnswer::Bindings(Vec::new()))
            }
        });
        let mut llm = ScriptedLlm::new();
        for i in 1..=max_retries + 2 {
            llm = llm.reply(REPAIR_SYSTEM, &distinct_query(i));
        }
        let llm = Arc::new(llm);
        let validator = QueryValidator::new(endpoint, Duration::from_secs(5));
        let bindings = BTreeMap::new();
        let ctx = RepairContext {
            question: "q",
            tagged_question: "q",
            uri_bindings: &bindings,
        };
        let initial = SparqlCandidate {
            query: distinct_query(0),
            provenance: Provenance::Initial,
        };
        let outcome = RepairLoop::new(llm.clone(), Duration::from_secs(5))
            .run(&validator, initial, ctx, max_retries)
            .await;
        (outcome, llm.calls_for(REPAIR_SYSTEM))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn never_more_than_max_retries_plus_one_validations(max_retries in 0usize..6) {
        let (outcome, repairs) = run_loop(max_retries, None);
        prop_assert_eq!(outcome.validations(), max_retries + 1);
        prop_assert_eq!(repairs, max_retries);
        let is_bound_reached = matches!(
            outcome,
            RepairOutcome::Exhausted { reason: ExhaustReason::BoundReached, .. }
        );
        prop_assert!(is_bound_reached);
    }

    #[test]
    fn success_stops_at_first_valid_candidate(max_retries in 0usize..6, valid_at in 0usize..6) {
        let (outcome, repairs) = run_loop(max_retries, Some(valid_at));
        if valid_at <= max_retries {
            prop_assert_eq!(outcome.validations(), valid_at + 1);
            prop_assert_eq!(repairs, valid_at);
            let expected = if valid_at == 0 {
                Provenance::Initial
            } else {
                Provenance::Repair(valid_at)
            };
            prop_assert_eq!(outcome.candidate().provenance, expected);
        } else {
            prop_assert!(!matches!(outcome, RepairOutcome::Success { .. }), "expected non-success outcome");
            prop_assert_eq!(outcome.validations(), max_retries + 1);
        }
    }
}
