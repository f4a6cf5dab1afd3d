//! Retry engine tests: budget accounting, classified remediation, and
//! deadline behavior, all driven through the mock seams.

use std::time::{Duration, Instant};

use crate::models::{Capabilities, DatasetStatistics};
use crate::services::error_classifier::{ErrorCategory, ErrorClassifier};
use crate::services::executor::ExecutionOptions;
use crate::services::llm::prompts::SchemaHints;
use crate::services::retry_engine::{RetryEngine, RetryPolicy};
use crate::services::validator::QueryValidator;
use crate::tests::common::{MockLlm, ScriptedExecutor, success_result, test_endpoint};
use crate::utils::sparql_text;

fn engine(policy: RetryPolicy) -> RetryEngine {
    RetryEngine::new(QueryValidator::new(false), policy)
}

fn far_deadline() -> Instant {
    Instant::now() + Duration::from_secs(300)
}

const VALID_QUERY: &str = "SELECT ?s WHERE { ?s ?p ?o } LIMIT 10";

// ============================================================================
// Pre-execution loop
// ============================================================================

#[tokio::test]
async fn valid_query_passes_without_llm_calls() {
    let engine = engine(RetryPolicy::default());
    let llm = MockLlm::with_replies(&[]);

    let outcome = engine
        .validate_and_repair(&llm, "list things", VALID_QUERY, &SchemaHints::default())
        .await;

    assert!(outcome.valid);
    assert!(!outcome.gave_up);
    assert_eq!(outcome.validation_attempts(), 1);
    assert_eq!(outcome.fix_calls, 0);
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn comma_iri_is_repaired_in_one_fix_call() {
    let engine = engine(RetryPolicy::default());
    let broken = "SELECT ?p WHERE { ?p <http://dbpedia.org/ontology/birthPlace> \
                  <http://dbpedia.org/resource/Santa_Cruz,_California> } LIMIT 3";
    let fixed = "SELECT ?p WHERE { ?p <http://dbpedia.org/ontology/birthPlace> \
                 <http://dbpedia.org/resource/Santa_Cruz%2C_California> } LIMIT 3";
    let llm = MockLlm::with_replies(&[fixed]);

    let outcome = engine
        .validate_and_repair(
            &llm,
            "Find people born in Santa Cruz, California",
            broken,
            &SchemaHints::default(),
        )
        .await;

    assert!(outcome.valid);
    assert_eq!(outcome.query, fixed);
    assert_eq!(outcome.validation_attempts(), 2);
    assert_eq!(outcome.fix_calls, 1);
    // the repair prompt carried the malformed-iri finding and its fix
    assert!(llm.prompts()[0].contains("malformed-iri"));
    assert!(llm.prompts()[0].contains("Santa_Cruz%2C_California"));
}

#[tokio::test]
async fn zero_validation_budget_means_zero_llm_calls() {
    let engine = engine(RetryPolicy { max_validation_retries: 0, ..RetryPolicy::default() });
    let llm = MockLlm::with_replies(&["SELECT ?s WHERE { ?s ?p ?o }"]);

    let outcome = engine
        .validate_and_repair(
            &llm,
            "anything",
            "SELECT ?s WHERE { ?s ?p ?o",
            &SchemaHints::default(),
        )
        .await;

    assert!(!outcome.valid);
    assert!(outcome.gave_up);
    assert_eq!(outcome.validation_attempts(), 1);
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn unparseable_fix_consumes_budget_without_changing_candidate() {
    let engine = engine(RetryPolicy { max_validation_retries: 2, ..RetryPolicy::default() });
    let broken = "SELECT ?s WHERE { ?s ?p ?o";
    let llm = MockLlm::with_replies(&["I cannot help with that.", "Sorry, still no."]);

    let outcome = engine
        .validate_and_repair(&llm, "anything", broken, &SchemaHints::default())
        .await;

    assert!(!outcome.valid);
    assert!(outcome.gave_up);
    assert_eq!(outcome.query, broken);
    // initial + 2 re-validations of the unchanged candidate
    assert_eq!(outcome.validation_attempts(), 3);
    assert_eq!(outcome.fix_calls, 2);
}

// ============================================================================
// Post-execution loop
// ============================================================================

#[tokio::test]
async fn timeout_halves_limit_and_retries() {
    let engine = engine(RetryPolicy::default());
    let classifier = ErrorClassifier::new();
    let query = "SELECT ?s WHERE { ?s ?p ?o } LIMIT 1000";

    let timeout_ctx = classifier.classify("Query execution timeout", Some(504), Some(query));
    assert_eq!(timeout_ctx.suggested_limit(), Some(500));

    let executor = ScriptedExecutor::new(vec![
        Err(timeout_ctx),
        Ok(success_result(&["s"], &["http://ex.org/a"])),
    ]);
    // simplification call fails, the mechanical LIMIT reduction still applies
    let llm = MockLlm::new(vec![Err(crate::services::llm::LlmError::Disabled)]);

    let outcome = engine
        .execute_with_recovery(
            &executor,
            &llm,
            "list everything",
            query,
            &test_endpoint(),
            &ExecutionOptions::default(),
            &SchemaHints::default(),
            None,
            far_deadline(),
        )
        .await;

    assert!(!outcome.gave_up);
    assert_eq!(outcome.execution_attempts, 2);
    assert_eq!(outcome.errors[0].category, ErrorCategory::Timeout);
    assert_eq!(sparql_text::find_limit(&executor.executed()[1]), Some(500));
    assert!(outcome.result.expect("result").is_success());
}

#[tokio::test]
async fn unknown_term_prompts_with_offending_iri_and_known_terms() {
    let engine = engine(RetryPolicy::default());
    let classifier = ErrorClassifier::new();
    let query = "SELECT ?s WHERE { ?s <http://example.org/unknownProp> ?o } LIMIT 5";
    let fixed = "SELECT ?s WHERE { ?s <http://example.org/knownProp> ?o } LIMIT 5";

    let ctx = classifier.classify(
        "Unknown predicate: http://example.org/unknownProp",
        Some(400),
        Some(query),
    );
    assert_eq!(ctx.category, ErrorCategory::UnknownTerm);

    let mut caps = Capabilities::new("http://localhost:3030/ds/sparql");
    let mut stats = DatasetStatistics::default();
    stats.top_properties = (0..10)
        .map(|i| (format!("http://example.org/prop{}", i), 100 - i as u64))
        .collect();
    caps.statistics = Some(stats);

    let executor = ScriptedExecutor::new(vec![
        Err(ctx),
        Ok(success_result(&["s"], &["http://ex.org/a"])),
    ]);
    let llm = MockLlm::with_replies(&[fixed]);

    let outcome = engine
        .execute_with_recovery(
            &executor,
            &llm,
            "things with the property",
            query,
            &test_endpoint(),
            &ExecutionOptions::default(),
            &SchemaHints::default(),
            Some(&caps),
            far_deadline(),
        )
        .await;

    assert!(!outcome.gave_up);
    assert_eq!(outcome.execution_attempts, 2);
    assert_eq!(executor.executed()[1], fixed);

    let prompt = &llm.prompts()[0];
    assert!(prompt.contains("http://example.org/unknownProp"));
    assert!(prompt.contains("http://example.org/prop0"));
}

#[tokio::test]
async fn authentication_failure_is_not_retried() {
    let engine = engine(RetryPolicy::default());
    let classifier = ErrorClassifier::new();
    let ctx = classifier.classify("401 Unauthorized", Some(401), Some(VALID_QUERY));

    let executor = ScriptedExecutor::new(vec![Err(ctx)]);
    let llm = MockLlm::with_replies(&[]);

    let outcome = engine
        .execute_with_recovery(
            &executor,
            &llm,
            "anything",
            VALID_QUERY,
            &test_endpoint(),
            &ExecutionOptions::default(),
            &SchemaHints::default(),
            None,
            far_deadline(),
        )
        .await;

    assert!(outcome.gave_up);
    assert_eq!(outcome.execution_attempts, 1);
    assert_eq!(executor.calls(), 1);
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn zero_execution_budget_means_no_reexecution() {
    let engine = engine(RetryPolicy { max_execution_retries: 0, ..RetryPolicy::default() });
    let classifier = ErrorClassifier::new();
    let ctx = classifier.classify("connection refused", None, Some(VALID_QUERY));

    let executor = ScriptedExecutor::new(vec![Err(ctx)]);
    let llm = MockLlm::with_replies(&[]);

    let outcome = engine
        .execute_with_recovery(
            &executor,
            &llm,
            "anything",
            VALID_QUERY,
            &test_endpoint(),
            &ExecutionOptions::default(),
            &SchemaHints::default(),
            None,
            far_deadline(),
        )
        .await;

    assert!(outcome.gave_up);
    assert_eq!(outcome.execution_attempts, 1);
    assert_eq!(executor.calls(), 1);
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn deadline_elapsing_during_backoff_stops_the_loop() {
    let engine = engine(RetryPolicy {
        base_backoff: Duration::from_millis(500),
        ..RetryPolicy::default()
    });
    let classifier = ErrorClassifier::new();
    let ctx = classifier.classify("connection refused", None, Some(VALID_QUERY));
    assert_eq!(ctx.category, ErrorCategory::Network);

    let executor = ScriptedExecutor::new(vec![Err(ctx)]);
    let llm = MockLlm::with_replies(&[]);

    let outcome = engine
        .execute_with_recovery(
            &executor,
            &llm,
            "anything",
            VALID_QUERY,
            &test_endpoint(),
            &ExecutionOptions::default(),
            &SchemaHints::default(),
            None,
            Instant::now() + Duration::from_millis(50),
        )
        .await;

    assert!(outcome.gave_up);
    // the backoff would overshoot the deadline, so no second HTTP call
    assert_eq!(executor.calls(), 1);
}

#[tokio::test]
async fn memory_error_lowers_limit_and_drops_distinct() {
    let engine = engine(RetryPolicy::default());
    let classifier = ErrorClassifier::new();
    let query = "SELECT DISTINCT ?s WHERE { ?s ?p ?o } LIMIT 100";
    let ctx = classifier.classify("Out of memory: result set too large", Some(500), Some(query));
    assert_eq!(ctx.category, ErrorCategory::Memory);

    let executor = ScriptedExecutor::new(vec![
        Err(ctx),
        Ok(success_result(&["s"], &["http://ex.org/a"])),
    ]);
    let llm = MockLlm::with_replies(&[]);

    let outcome = engine
        .execute_with_recovery(
            &executor,
            &llm,
            "anything",
            query,
            &test_endpoint(),
            &ExecutionOptions::default(),
            &SchemaHints::default(),
            None,
            far_deadline(),
        )
        .await;

    assert!(!outcome.gave_up);
    let retried = &executor.executed()[1];
    assert_eq!(sparql_text::find_limit(retried), Some(50));
    assert!(!retried.contains("DISTINCT"));
    // memory remediation is mechanical, no LLM involved
    assert_eq!(llm.calls(), 0);
}
