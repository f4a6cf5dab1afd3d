//! End-to-end orchestrator tests over the mock seams: happy path with
//! explanation, repair-then-execute, budget exhaustion, and metadata
//! accounting.

use std::sync::Arc;
use std::time::Duration;

use crate::services::discovery::CapabilityCache;
use crate::services::error_classifier::{ErrorCategory, ErrorClassifier};
use crate::services::orchestrator::{Orchestrator, OrchestratorOptions};
use crate::services::retry_engine::{RetryEngine, RetryPolicy};
use crate::services::validator::QueryValidator;
use crate::models::QueryStatus;
use crate::tests::common::{MockLlm, ScriptedExecutor, success_result, test_endpoint};

fn orchestrator(
    llm: Arc<MockLlm>,
    executor: Arc<ScriptedExecutor>,
    policy: RetryPolicy,
) -> Orchestrator {
    Orchestrator::new(
        llm,
        executor,
        RetryEngine::new(QueryValidator::new(false), policy),
        Arc::new(CapabilityCache::new()),
    )
}

fn options() -> OrchestratorOptions {
    OrchestratorOptions {
        deadline: Duration::from_secs(60),
        ensure_capabilities: false,
        ..OrchestratorOptions::default()
    }
}

const DRAFT: &str = "SELECT ?name WHERE { ?p <http://xmlns.com/foaf/0.1/name> ?name } LIMIT 3";

#[tokio::test]
async fn happy_path_generates_executes_and_explains() {
    let llm = Arc::new(MockLlm::with_replies(&[
        DRAFT,
        "The query found two people.",
    ]));
    let executor = Arc::new(ScriptedExecutor::new(vec![Ok(success_result(
        &["name"],
        &["http://ex.org/ada", "http://ex.org/grace"],
    ))]));

    let outcome = orchestrator(llm.clone(), executor.clone(), RetryPolicy::default())
        .run("who is named?", &test_endpoint(), &options())
        .await;

    assert_eq!(outcome.result.status, QueryStatus::Success);
    assert_eq!(outcome.result.row_count, 2);
    assert_eq!(outcome.original_query.as_deref(), Some(DRAFT));
    assert_eq!(outcome.final_query.as_deref(), Some(DRAFT));
    assert_eq!(outcome.explanation.as_deref(), Some("The query found two people."));

    let metadata = &outcome.metadata;
    assert!(!metadata.gave_up);
    assert_eq!(metadata.validation_attempts, 1);
    assert_eq!(metadata.execution_attempts, 1);
    assert_eq!(metadata.fix_calls, 0);
    assert!(metadata.classifications.is_empty());
    // generation + explanation
    assert_eq!(metadata.prompt_tokens, 20);
    assert_eq!(metadata.completion_tokens, 40);
    assert!(!metadata.request_id.is_empty());
}

#[tokio::test]
async fn comma_iri_draft_is_repaired_then_executed() {
    let broken = "SELECT ?p WHERE { ?p <http://dbpedia.org/ontology/birthPlace> \
                  <http://dbpedia.org/resource/Santa_Cruz,_California> } LIMIT 3";
    let fixed = "SELECT ?p WHERE { ?p <http://dbpedia.org/ontology/birthPlace> \
                 <http://dbpedia.org/resource/Santa_Cruz%2C_California> } LIMIT 3";

    let llm = Arc::new(MockLlm::with_replies(&[broken, fixed, "Three people."]));
    let executor = Arc::new(ScriptedExecutor::new(vec![Ok(success_result(
        &["p"],
        &["http://ex.org/a", "http://ex.org/b", "http://ex.org/c"],
    ))]));

    let outcome = orchestrator(llm, executor.clone(), RetryPolicy::default())
        .run(
            "Find people born in Santa Cruz, California",
            &test_endpoint(),
            &options(),
        )
        .await;

    assert_eq!(outcome.result.status, QueryStatus::Success);
    assert!(outcome.result.row_count <= 3);
    assert_eq!(outcome.metadata.validation_attempts, 2);
    assert_eq!(outcome.metadata.execution_attempts, 1);
    assert_eq!(outcome.final_query.as_deref(), Some(fixed));
    assert_eq!(executor.executed(), vec![fixed.to_string()]);
}

#[tokio::test]
async fn unrepairable_draft_exhausts_budget_and_gives_up() {
    // max_validation_retries = 1 and an LLM that never repairs
    let llm = Arc::new(MockLlm::with_replies(&[
        "SELECT ?s WHERE { ?s ?p ?o",
        "SELECT ?s WHERE { ?s ?p ?o",
    ]));
    let executor = Arc::new(ScriptedExecutor::new(vec![]));
    let policy = RetryPolicy { max_validation_retries: 1, ..RetryPolicy::default() };

    let outcome = orchestrator(llm.clone(), executor.clone(), policy)
        .run("anything", &test_endpoint(), &options())
        .await;

    assert!(outcome.metadata.gave_up);
    assert_eq!(outcome.result.status, QueryStatus::Failed);
    let error = outcome.result.error.as_ref().expect("error context");
    assert_eq!(error.category, ErrorCategory::Syntax);
    // exactly 2 validation reports: initial + one repaired candidate
    assert_eq!(outcome.metadata.validation_attempts, 2);
    // invariant: attempts <= max_validation_retries + 1
    assert!(outcome.metadata.validation_attempts <= 1 + 1);
    // the executor was never touched
    assert_eq!(executor.calls(), 0);
    assert!(outcome.explanation.is_none());
}

#[tokio::test]
async fn execution_failure_then_recovery_collects_classifications() {
    let classifier = ErrorClassifier::new();
    let draft = "SELECT ?s WHERE { ?s ?p ?o } LIMIT 1000";
    let timeout_ctx = classifier.classify("Query execution timeout", Some(504), Some(draft));

    let llm = Arc::new(MockLlm::new(vec![
        Ok(draft.to_string()),
        // simplification reply keeps the shape, lowers nothing; the engine
        // enforces the halved LIMIT mechanically
        Ok(draft.to_string()),
        Ok("Lots of rows.".to_string()),
    ]));
    let executor = Arc::new(ScriptedExecutor::new(vec![
        Err(timeout_ctx),
        Ok(success_result(&["s"], &["http://ex.org/a"])),
    ]));

    let outcome = orchestrator(llm, executor.clone(), RetryPolicy::default())
        .run("list everything", &test_endpoint(), &options())
        .await;

    assert_eq!(outcome.result.status, QueryStatus::Success);
    assert_eq!(outcome.metadata.execution_attempts, 2);
    assert_eq!(outcome.metadata.classifications, vec![ErrorCategory::Timeout]);
    assert!(!outcome.metadata.gave_up);
    assert!(
        executor.executed()[1].contains("LIMIT 500"),
        "second attempt: {}",
        executor.executed()[1]
    );
}

#[tokio::test]
async fn llm_with_no_query_in_reply_fails_closed() {
    let llm = Arc::new(MockLlm::with_replies(&["I don't know any SPARQL."]));
    let executor = Arc::new(ScriptedExecutor::new(vec![]));

    let outcome = orchestrator(llm, executor.clone(), RetryPolicy::default())
        .run("anything", &test_endpoint(), &options())
        .await;

    assert!(outcome.metadata.gave_up);
    assert_eq!(outcome.result.status, QueryStatus::Failed);
    assert!(outcome.original_query.is_none());
    assert_eq!(executor.calls(), 0);
}

#[tokio::test]
async fn failed_explanation_still_succeeds_with_warning() {
    let llm = Arc::new(MockLlm::new(vec![
        Ok(DRAFT.to_string()),
        Err(crate::services::llm::LlmError::ApiError("explanation down".to_string())),
    ]));
    let executor = Arc::new(ScriptedExecutor::new(vec![Ok(success_result(
        &["name"],
        &["http://ex.org/ada"],
    ))]));

    let outcome = orchestrator(llm, executor, RetryPolicy::default())
        .run("who is named?", &test_endpoint(), &options())
        .await;

    assert_eq!(outcome.result.status, QueryStatus::Success);
    assert!(outcome.explanation.is_none());
    assert!(
        outcome
            .result
            .warnings
            .iter()
            .any(|w| w.contains("explanation unavailable") || w.contains("Result explanation")),
        "warnings: {:?}",
        outcome.result.warnings
    );
}
