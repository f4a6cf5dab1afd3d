//! Shared test doubles for the pipeline seams
//!
//! `MockLlm` replays scripted replies and records every prompt it saw;
//! `ScriptedExecutor` replays scripted execution outcomes and records every
//! query it was asked to run. Both panic-free: exhausted scripts return
//! errors instead.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::models::{Endpoint, QueryResult, QueryStatus, TypedValue};
use crate::services::error_classifier::ErrorContext;
use crate::services::executor::{ExecutionError, ExecutionOptions, SparqlExecutor};
use crate::services::llm::{GenerateRequest, GenerateResponse, LlmClient, LlmError};

// ============================================================================
// Mock LLM
// ============================================================================

pub struct MockLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<String>>,
}

impl MockLlm {
    pub fn new(replies: Vec<Result<String, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Convenience: every reply succeeds
    pub fn with_replies(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Ok((*r).to_string())).collect())
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts poisoned").clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().expect("prompts poisoned").len()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, LlmError> {
        self.prompts
            .lock()
            .expect("prompts poisoned")
            .push(request.prompt.clone());
        let next = self
            .replies
            .lock()
            .expect("replies poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::ApiError("no scripted reply left".to_string())));
        next.map(|content| GenerateResponse {
            content,
            prompt_tokens: 10,
            completion_tokens: 20,
            finish_reason: Some("stop".to_string()),
        })
    }
}

// ============================================================================
// Scripted Executor
// ============================================================================

pub struct ScriptedExecutor {
    steps: Mutex<VecDeque<Result<QueryResult, ErrorContext>>>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(steps: Vec<Result<QueryResult, ErrorContext>>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Queries in the order they were executed
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().expect("executed poisoned").clone()
    }

    pub fn calls(&self) -> usize {
        self.executed.lock().expect("executed poisoned").len()
    }
}

#[async_trait]
impl SparqlExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        query_text: &str,
        _endpoint: &Endpoint,
        _options: &ExecutionOptions,
    ) -> Result<QueryResult, ExecutionError> {
        self.executed
            .lock()
            .expect("executed poisoned")
            .push(query_text.to_string());
        let next = self
            .steps
            .lock()
            .expect("steps poisoned")
            .pop_front()
            .unwrap_or_else(|| {
                Ok(success_result(&["s"], &[]))
            });
        next.map_err(ExecutionError::new)
    }
}

// ============================================================================
// Builders
// ============================================================================

/// A successful SELECT result with IRI bindings for one variable per row
pub fn success_result(variables: &[&str], rows: &[&str]) -> QueryResult {
    let variables: Vec<String> = variables.iter().map(|v| (*v).to_string()).collect();
    let first_var = variables.first().cloned().unwrap_or_else(|| "s".to_string());
    let bindings: Vec<HashMap<String, TypedValue>> = rows
        .iter()
        .map(|value| {
            let mut row = HashMap::new();
            row.insert(first_var.clone(), TypedValue::iri(*value));
            row
        })
        .collect();
    let row_count = bindings.len();

    QueryResult {
        status: QueryStatus::Success,
        variables,
        bindings,
        row_count,
        execution_time_ms: 5,
        bytes_received: 128,
        warnings: Vec::new(),
        error: None,
    }
}

pub fn test_endpoint() -> Endpoint {
    Endpoint::new("http://localhost:3030/ds/sparql")
}
