//! End-to-end execution pipeline
//!
//! generate -> validate/repair -> execute/recover -> explain. The
//! orchestrator owns the LLM capability, the executor seam, and the retry
//! engine per request; it never returns an error. Every failure mode is
//! represented inside `OrchestratorOutcome`.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::models::{Endpoint, InferredSchema, QueryResult};
use crate::services::discovery::{CapabilityCache, CapabilityDetector, DetectionOptions};
use crate::services::error_classifier::{ErrorCategory, ErrorContext, RetryStrategy};
use crate::services::executor::{ExecutionOptions, SparqlExecutor};
use crate::services::llm::prompts::{self, SchemaHints};
use crate::services::llm::{GenerateRequest, GenerateResponse, LlmClient, LlmError};
use crate::services::retry_engine::RetryEngine;
use crate::utils::StringExt;
use crate::utils::sparql_text;

use async_trait::async_trait;

// ============================================================================
// Options / Outcome
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Total request deadline; every phase runs under it
    pub deadline: Duration,
    pub execution: ExecutionOptions,
    /// Refresh capabilities for the endpoint before generation
    pub ensure_capabilities: bool,
    pub detection: DetectionOptions,
    /// Caller-provided inferred schema used as prompt grounding
    pub schema: Option<InferredSchema>,
    /// Ask the LLM for a natural-language summary on success
    pub explain_results: bool,
    /// Bindings handed to the explanation prompt
    pub explain_row_limit: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(120),
            execution: ExecutionOptions::default(),
            ensure_capabilities: false,
            detection: DetectionOptions::default(),
            schema: None,
            explain_results: true,
            explain_row_limit: 10,
        }
    }
}

/// Request accounting surfaced with every outcome
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutcomeMetadata {
    pub request_id: String,
    /// Validation reports produced, pre-execution plus re-entries
    pub validation_attempts: u32,
    pub execution_attempts: u32,
    /// LLM repair calls across both loops
    pub fix_calls: u32,
    pub generation_time_ms: u64,
    pub validation_time_ms: u64,
    pub execution_time_ms: u64,
    pub total_time_ms: u64,
    /// Error categories observed, in order
    pub classifications: Vec<ErrorCategory>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub gave_up: bool,
}

/// Everything a caller learns from one request
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorOutcome {
    pub question: String,
    /// First query the LLM produced, before any repair
    pub original_query: Option<String>,
    /// Query that was (last) executed
    pub final_query: Option<String>,
    pub result: QueryResult,
    pub explanation: Option<String>,
    pub metadata: OutcomeMetadata,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    executor: Arc<dyn SparqlExecutor>,
    retry_engine: RetryEngine,
    detector: CapabilityDetector,
    capability_cache: Arc<CapabilityCache>,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: Arc<dyn SparqlExecutor>,
        retry_engine: RetryEngine,
        capability_cache: Arc<CapabilityCache>,
    ) -> Self {
        Self {
            llm,
            executor,
            retry_engine,
            detector: CapabilityDetector::new(),
            capability_cache,
        }
    }

    /// Answer a natural-language question against a SPARQL endpoint.
    ///
    /// Never fails: validation dead-ends, endpoint errors, and deadline
    /// expiry all come back inside the outcome with `gave_up` set.
    pub async fn run(
        &self,
        question: &str,
        endpoint: &Endpoint,
        options: &OrchestratorOptions,
    ) -> OrchestratorOutcome {
        let started = Instant::now();
        let deadline = started + options.deadline;
        let request_id = Uuid::new_v4().to_string();
        let llm = UsageTracking::new(self.llm.clone());

        tracing::info!(
            "[{}] Question against {}: {}",
            request_id,
            endpoint.url,
            question
        );

        let mut metadata = OutcomeMetadata { request_id, ..OutcomeMetadata::default() };
        let mut hints = SchemaHints { capabilities: None, schema: options.schema.clone() };

        // 1. grounding
        if options.ensure_capabilities {
            let detector = &self.detector;
            let detection = options.detection.clone();
            let capabilities = self
                .capability_cache
                .get_or_refresh(&endpoint.url, || async {
                    detector.detect(endpoint, &detection).await
                })
                .await;
            hints.capabilities = Some(capabilities);
        }

        // 2. initial generation
        let generation_started = Instant::now();
        let generated = self.generate_initial(&llm, question, &hints).await;
        metadata.generation_time_ms = generation_started.elapsed().as_millis() as u64;

        let original_query = match generated {
            Ok(query) => query,
            Err(context) => {
                metadata.gave_up = true;
                metadata.classifications.push(context.category);
                llm.store_usage(&mut metadata);
                metadata.total_time_ms = started.elapsed().as_millis() as u64;
                return OrchestratorOutcome {
                    question: question.to_string(),
                    original_query: None,
                    final_query: None,
                    result: QueryResult::failed(context),
                    explanation: None,
                    metadata,
                };
            },
        };

        // 3. pre-execution validation loop
        let validation_started = Instant::now();
        let validated = self
            .retry_engine
            .validate_and_repair(llm.as_dyn(), question, &original_query, &hints)
            .await;
        metadata.validation_time_ms = validation_started.elapsed().as_millis() as u64;
        metadata.validation_attempts = validated.validation_attempts();
        metadata.fix_calls += validated.fix_calls;

        if !validated.valid {
            let context = validation_failure_context(&validated.query, validated.last_report());
            metadata.gave_up = true;
            metadata.classifications.push(context.category);
            llm.store_usage(&mut metadata);
            metadata.total_time_ms = started.elapsed().as_millis() as u64;
            return OrchestratorOutcome {
                question: question.to_string(),
                original_query: Some(original_query),
                final_query: Some(validated.query),
                result: QueryResult::failed(context),
                explanation: None,
                metadata,
            };
        }

        // 4 + 5. execution with classified recovery
        let execution_started = Instant::now();
        let executed = self
            .retry_engine
            .execute_with_recovery(
                self.executor.as_ref(),
                llm.as_dyn(),
                question,
                &validated.query,
                endpoint,
                &options.execution,
                &hints,
                hints.capabilities.as_ref(),
                deadline,
            )
            .await;
        metadata.execution_time_ms = execution_started.elapsed().as_millis() as u64;
        metadata.execution_attempts = executed.execution_attempts;
        metadata.validation_attempts += executed.extra_validation_attempts;
        metadata.fix_calls += executed.fix_calls;
        metadata
            .classifications
            .extend(executed.errors.iter().map(|e| e.category));
        metadata.gave_up = executed.gave_up;

        let mut result = match executed.result {
            Some(result) => result,
            None => {
                let last = executed.errors.last().cloned().unwrap_or_else(deadline_context);
                if last.category == ErrorCategory::Timeout {
                    QueryResult::timed_out(last)
                } else {
                    QueryResult::failed(last)
                }
            },
        };

        // 6. explanation
        let explanation = if result.is_success() && options.explain_results {
            let explained = self
                .explain(&llm, question, &result, options.explain_row_limit)
                .await;
            match explained {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::warn!("Explanation call failed: {}", e);
                    result
                        .warnings
                        .push(format!("Result explanation unavailable: {}", e));
                    None
                },
            }
        } else {
            None
        };

        llm.store_usage(&mut metadata);
        metadata.total_time_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            "[{}] Finished: status={:?} rows={} validation_attempts={} execution_attempts={}",
            metadata.request_id,
            result.status,
            result.row_count,
            metadata.validation_attempts,
            metadata.execution_attempts
        );

        OrchestratorOutcome {
            question: question.to_string(),
            original_query: Some(original_query),
            final_query: Some(executed.final_query),
            result,
            explanation,
            metadata,
        }
    }

    async fn generate_initial(
        &self,
        llm: &UsageTracking,
        question: &str,
        hints: &SchemaHints,
    ) -> Result<String, ErrorContext> {
        let prompt = prompts::generation_prompt(question, hints);
        let request =
            GenerateRequest::new(prompt).with_system(prompts::GENERATION_SYSTEM_PROMPT.to_string());

        let response = llm.generate(&request).await.map_err(|e| ErrorContext {
            category: ErrorCategory::Unknown,
            severity: 7,
            recoverable: false,
            retry_strategy: RetryStrategy::None,
            message: format!("Query generation failed: {}", e),
            suggestions: vec!["Check the LLM provider configuration".to_string()],
            technical_details: e.to_string(),
            metadata: BTreeMap::new(),
        })?;

        sparql_text::extract_query_text(&response.content).ok_or_else(|| ErrorContext {
            category: ErrorCategory::Parse,
            severity: 6,
            recoverable: false,
            retry_strategy: RetryStrategy::None,
            message: "LLM reply contained no SPARQL query".to_string(),
            suggestions: vec!["Rephrase the question".to_string()],
            technical_details: response.content,
            metadata: BTreeMap::new(),
        })
    }

    async fn explain(
        &self,
        llm: &UsageTracking,
        question: &str,
        result: &QueryResult,
        row_limit: usize,
    ) -> Result<String, LlmError> {
        let rows: Vec<_> = result.bindings.iter().take(row_limit).cloned().collect();
        let prompt = prompts::explanation_prompt(question, &result.variables, &rows);
        let response = llm.generate(&GenerateRequest::new(prompt)).await?;
        Ok(response.content.trimmed())
    }
}

/// Failure context for a query that never passed validation
fn validation_failure_context(
    query: &str,
    report: Option<&crate::services::validator::ValidationReport>,
) -> ErrorContext {
    let (message, details) = match report {
        Some(report) => {
            let first = report
                .issues
                .first()
                .map(|i| i.message.clone())
                .unwrap_or_else(|| "query is invalid".to_string());
            let all = report
                .issues
                .iter()
                .map(|i| format!("[{}] {}", i.rule, i.message))
                .collect::<Vec<_>>()
                .join("; ");
            (first, all)
        },
        None => ("query is invalid".to_string(), String::new()),
    };

    ErrorContext {
        category: ErrorCategory::Syntax,
        severity: 5,
        recoverable: false,
        retry_strategy: RetryStrategy::None,
        message: format!("Query failed validation: {}", message),
        suggestions: vec![
            "Rephrase the question with more specific terms".to_string(),
            "Inspect the validation issues in the attempt history".to_string(),
        ],
        technical_details: details,
        metadata: BTreeMap::new(),
    }
    .with_metadata("final_query", query.to_string())
}

/// Context for a request that hit its deadline without a classified error
fn deadline_context() -> ErrorContext {
    ErrorContext {
        category: ErrorCategory::Timeout,
        severity: 6,
        recoverable: true,
        retry_strategy: RetryStrategy::None,
        message: "Request deadline elapsed".to_string(),
        suggestions: vec!["Raise the request deadline".to_string()],
        technical_details: String::new(),
        metadata: BTreeMap::new(),
    }
}

// ============================================================================
// Usage Tracking Adapter
// ============================================================================

/// Counts token usage across every LLM call in one request
struct UsageTracking {
    wrapper: Arc<UsageTrackingClient>,
}

struct UsageTrackingClient {
    inner: Arc<dyn LlmClient>,
    prompt_tokens: AtomicU32,
    completion_tokens: AtomicU32,
}

#[async_trait]
impl LlmClient for UsageTrackingClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, LlmError> {
        let response = self.inner.generate(request).await?;
        self.prompt_tokens.fetch_add(response.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(response.completion_tokens, Ordering::Relaxed);
        Ok(response)
    }
}

impl UsageTracking {
    fn new(inner: Arc<dyn LlmClient>) -> Self {
        let wrapper = Arc::new(UsageTrackingClient {
            inner,
            prompt_tokens: AtomicU32::new(0),
            completion_tokens: AtomicU32::new(0),
        });
        Self { wrapper }
    }

    fn as_dyn(&self) -> &dyn LlmClient {
        self.wrapper.as_ref()
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, LlmError> {
        self.wrapper.generate(request).await
    }

    fn store_usage(&self, metadata: &mut OutcomeMetadata) {
        metadata.prompt_tokens = self.wrapper.prompt_tokens.load(Ordering::Relaxed);
        metadata.completion_tokens = self.wrapper.completion_tokens.load(Ordering::Relaxed);
    }
}
