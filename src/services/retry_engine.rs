//! Query repair state machines
//!
//! Two independent loops share the error taxonomy: the pre-execution loop
//! repairs queries that fail static validation via targeted LLM prompts,
//! and the post-execution loop remediates classified endpoint failures.
//! Each loop has its own monotonically decreasing budget; at zero it gives
//! up and no further LLM or network calls happen.

use std::time::{Duration, Instant};

use crate::models::{Capabilities, Endpoint, QueryResult};
use crate::services::error_classifier::{ErrorCategory, ErrorContext, RetryStrategy};
use crate::services::executor::{ExecutionOptions, SparqlExecutor};
use crate::services::llm::prompts::{self, SchemaHints};
use crate::services::llm::{GenerateRequest, LlmClient};
use crate::services::validator::{QueryValidator, ValidationReport};
use crate::utils::sparql_text;

// ============================================================================
// Policy / Outcome Types
// ============================================================================

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// LLM fix calls allowed by the validation loop
    pub max_validation_retries: u32,
    /// Re-executions allowed by the execution loop
    pub max_execution_retries: u32,
    /// Base delay for linear/exponential backoff
    pub base_backoff: Duration,
    /// LIMIT injected when a failing query has none
    pub default_limit: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_validation_retries: 3,
            max_execution_retries: 3,
            base_backoff: Duration::from_millis(500),
            default_limit: 100,
        }
    }
}

/// One pre-execution attempt: the candidate and its report
#[derive(Debug, Clone)]
pub struct ValidationAttempt {
    pub query: String,
    pub report: ValidationReport,
    /// Raw LLM reply that produced the next candidate, when a fix was asked
    pub llm_fix: Option<String>,
}

/// Result of the pre-execution repair loop
#[derive(Debug, Clone)]
pub struct ValidationLoopResult {
    pub query: String,
    pub valid: bool,
    pub gave_up: bool,
    /// All validation reports, one per attempt
    pub attempts: Vec<ValidationAttempt>,
    pub fix_calls: u32,
}

impl ValidationLoopResult {
    pub fn validation_attempts(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn last_report(&self) -> Option<&ValidationReport> {
        self.attempts.last().map(|a| &a.report)
    }
}

/// Result of the post-execution recovery loop
#[derive(Debug)]
pub struct ExecutionLoopResult {
    pub result: Option<QueryResult>,
    pub final_query: String,
    pub execution_attempts: u32,
    /// Validation attempts added by server-reported syntax errors
    pub extra_validation_attempts: u32,
    pub fix_calls: u32,
    pub errors: Vec<ErrorContext>,
    pub gave_up: bool,
}

// ============================================================================
// Engine
// ============================================================================

pub struct RetryEngine {
    validator: QueryValidator,
    policy: RetryPolicy,
}

impl RetryEngine {
    pub fn new(validator: QueryValidator, policy: RetryPolicy) -> Self {
        Self { validator, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    // ========================================
    // Pre-execution loop
    // ========================================

    /// Validate a candidate query, asking the LLM to repair it while the
    /// budget lasts.
    ///
    /// A budget of zero means zero LLM calls: the first report decides.
    /// An unparseable LLM reply consumes budget without changing the
    /// candidate.
    pub async fn validate_and_repair(
        &self,
        llm: &dyn LlmClient,
        question: &str,
        initial_query: &str,
        hints: &SchemaHints,
    ) -> ValidationLoopResult {
        let mut budget = self.policy.max_validation_retries;
        let mut current = initial_query.to_string();
        let mut attempts: Vec<ValidationAttempt> = Vec::new();
        let mut fix_calls = 0u32;

        loop {
            let report = self.validator.validate(&current);
            let valid = report.is_valid;
            attempts.push(ValidationAttempt {
                query: current.clone(),
                report,
                llm_fix: None,
            });

            if valid {
                return ValidationLoopResult {
                    query: current,
                    valid: true,
                    gave_up: false,
                    attempts,
                    fix_calls,
                };
            }

            if budget == 0 {
                tracing::warn!(
                    "Validation budget exhausted after {} attempts, giving up",
                    attempts.len()
                );
                return ValidationLoopResult {
                    query: current,
                    valid: false,
                    gave_up: true,
                    attempts,
                    fix_calls,
                };
            }
            budget -= 1;
            fix_calls += 1;

            let report = &attempts.last().expect("attempt just pushed").report;
            let prompt = prompts::validation_repair_prompt(question, &current, report, hints);
            let request = GenerateRequest::new(prompt)
                .with_system(prompts::GENERATION_SYSTEM_PROMPT.to_string());

            match llm.generate(&request).await {
                Ok(response) => {
                    attempts.last_mut().expect("attempt just pushed").llm_fix =
                        Some(response.content.clone());
                    match sparql_text::extract_query_text(&response.content) {
                        Some(fixed) => {
                            tracing::debug!("LLM produced repaired candidate query");
                            current = fixed;
                        },
                        None => {
                            tracing::warn!(
                                "LLM repair reply contained no query; candidate unchanged"
                            );
                        },
                    }
                },
                Err(e) => {
                    tracing::warn!("LLM repair call failed: {}; candidate unchanged", e);
                },
            }
        }
    }

    // ========================================
    // Post-execution loop
    // ========================================

    /// Execute a validated query, remediating classified failures until
    /// success, budget exhaustion, unrecoverable error, or deadline.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute_with_recovery(
        &self,
        executor: &dyn SparqlExecutor,
        llm: &dyn LlmClient,
        question: &str,
        query: &str,
        endpoint: &Endpoint,
        options: &ExecutionOptions,
        hints: &SchemaHints,
        capabilities: Option<&Capabilities>,
        deadline: Instant,
    ) -> ExecutionLoopResult {
        let mut budget = self.policy.max_execution_retries;
        let mut current = query.to_string();
        let mut outcome = ExecutionLoopResult {
            result: None,
            final_query: current.clone(),
            execution_attempts: 0,
            extra_validation_attempts: 0,
            fix_calls: 0,
            errors: Vec::new(),
            gave_up: false,
        };
        let mut unknown_retried = false;

        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|d| !d.is_zero()) else {
                tracing::warn!("Deadline reached before execution attempt, giving up");
                outcome.gave_up = true;
                outcome.final_query = current;
                return outcome;
            };

            let attempt_options = ExecutionOptions {
                timeout: options.timeout.min(remaining),
                ..options.clone()
            };

            outcome.execution_attempts += 1;
            match executor.execute(&current, endpoint, &attempt_options).await {
                Ok(result) => {
                    outcome.result = Some(result);
                    outcome.final_query = current;
                    return outcome;
                },
                Err(error) => {
                    let context = error.context;
                    tracing::info!(
                        "Execution attempt {} failed: {} ({})",
                        outcome.execution_attempts,
                        context.message,
                        context.category.as_str()
                    );
                    outcome.errors.push(context.clone());

                    if !context.recoverable
                        || context.retry_strategy == RetryStrategy::None
                        || budget == 0
                        || (context.category == ErrorCategory::Unknown && unknown_retried)
                    {
                        outcome.gave_up = true;
                        outcome.final_query = current;
                        return outcome;
                    }
                    budget -= 1;
                    if context.category == ErrorCategory::Unknown {
                        unknown_retried = true;
                    }

                    if !self.backoff(&context, outcome.execution_attempts, deadline).await {
                        tracing::warn!("Deadline elapsed during backoff, no further attempts");
                        outcome.gave_up = true;
                        outcome.final_query = current;
                        return outcome;
                    }

                    current = self
                        .remediate(
                            llm,
                            question,
                            current,
                            &context,
                            hints,
                            capabilities,
                            &mut outcome,
                        )
                        .await;
                },
            }
        }
    }

    /// Sleep per the error's retry strategy. Returns false when the
    /// deadline would elapse first.
    async fn backoff(&self, context: &ErrorContext, attempt: u32, deadline: Instant) -> bool {
        let delay = match context.retry_strategy {
            RetryStrategy::None | RetryStrategy::Immediate => Duration::ZERO,
            RetryStrategy::LinearBackoff => match context.retry_after_secs() {
                Some(secs) => Duration::from_secs(secs),
                None => self.policy.base_backoff * attempt,
            },
            RetryStrategy::ExponentialBackoff => {
                self.policy.base_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
            },
        };

        if delay.is_zero() {
            return true;
        }
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            return false;
        };
        if delay >= remaining {
            return false;
        }
        tokio::time::sleep(delay).await;
        true
    }

    /// Produce the next candidate query for a classified failure
    #[allow(clippy::too_many_arguments)]
    async fn remediate(
        &self,
        llm: &dyn LlmClient,
        question: &str,
        current: String,
        context: &ErrorContext,
        hints: &SchemaHints,
        capabilities: Option<&Capabilities>,
        outcome: &mut ExecutionLoopResult,
    ) -> String {
        match context.category {
            ErrorCategory::Timeout | ErrorCategory::QueryTooComplex => {
                let prompt = prompts::simplify_prompt(question, &current, context);
                let candidate = self
                    .ask_llm(llm, prompt, &mut outcome.fix_calls)
                    .await
                    .unwrap_or_else(|| current.clone());
                self.enforce_limit(candidate, &current, context)
            },
            ErrorCategory::Memory => {
                let reduced = sparql_text::reduce_limit(&current, self.policy.default_limit);
                sparql_text::remove_distinct(&reduced)
            },
            ErrorCategory::UnknownTerm => {
                let nearest = nearest_terms(capabilities, 10);
                let prompt = prompts::error_repair_prompt(question, &current, context, &nearest);
                self.ask_llm(llm, prompt, &mut outcome.fix_calls)
                    .await
                    .unwrap_or(current)
            },
            ErrorCategory::Syntax | ErrorCategory::Parse => {
                // server-side rejection: re-enter the validation loop
                let repaired = self
                    .validate_and_repair(llm, question, &current, hints)
                    .await;
                outcome.extra_validation_attempts += repaired.validation_attempts();
                outcome.fix_calls += repaired.fix_calls;
                if repaired.valid {
                    repaired.query
                } else {
                    // locally valid already; ask for a repair against the
                    // server's message instead
                    let prompt =
                        prompts::error_repair_prompt(question, &current, context, &[]);
                    self.ask_llm(llm, prompt, &mut outcome.fix_calls)
                        .await
                        .unwrap_or(current)
                }
            },
            // transient transport conditions retry the same query
            ErrorCategory::RateLimit
            | ErrorCategory::Network
            | ErrorCategory::EndpointUnavailable
            | ErrorCategory::Unknown => current,
            // unreachable: unrecoverable categories return before remediation
            ErrorCategory::Authentication | ErrorCategory::AccessDenied => current,
        }
    }

    async fn ask_llm(
        &self,
        llm: &dyn LlmClient,
        prompt: String,
        fix_calls: &mut u32,
    ) -> Option<String> {
        *fix_calls += 1;
        let request =
            GenerateRequest::new(prompt).with_system(prompts::GENERATION_SYSTEM_PROMPT.to_string());
        match llm.generate(&request).await {
            Ok(response) => sparql_text::extract_query_text(&response.content),
            Err(e) => {
                tracing::warn!("LLM remediation call failed: {}", e);
                None
            },
        }
    }

    /// Guarantee the timeout remediation shrinks the query: inject a LIMIT
    /// when absent, halve it when the candidate kept the failing value.
    fn enforce_limit(&self, candidate: String, failed: &str, context: &ErrorContext) -> String {
        let failed_limit = sparql_text::find_limit(failed);
        let target = context
            .suggested_limit()
            .or_else(|| sparql_text::suggested_limit(failed))
            .unwrap_or(self.policy.default_limit);

        match sparql_text::find_limit(&candidate) {
            None => sparql_text::set_limit(&candidate, target),
            Some(kept) if Some(kept) == failed_limit => {
                sparql_text::set_limit(&candidate, target)
            },
            Some(_) => candidate,
        }
    }
}

/// Grounding terms offered to the LLM for unknown-term repair: top
/// predicates from statistics first, discovered namespaces otherwise.
fn nearest_terms(capabilities: Option<&Capabilities>, limit: usize) -> Vec<String> {
    let Some(caps) = capabilities else {
        return Vec::new();
    };
    if let Some(stats) = &caps.statistics
        && !stats.top_properties.is_empty()
    {
        return stats
            .top_properties
            .iter()
            .take(limit)
            .map(|(iri, _)| format!("<{}>", iri))
            .collect();
    }
    caps.namespaces
        .iter()
        .take(limit)
        .map(|(prefix, iri)| format!("PREFIX {}: <{}>", prefix, iri))
        .collect()
}
