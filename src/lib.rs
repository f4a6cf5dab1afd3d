//! Quasar Library
//!
//! This library contains all the core modules for the Quasar
//! natural-language-to-SPARQL agent.

use std::sync::Arc;
use std::time::Duration;

pub mod config;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::Config;
pub use models::{
    Capabilities, DatasetStatistics, Endpoint, EndpointAuth, EndpointHealth, EndpointStatus,
    InferredSchema, Query, QueryResult, QueryStatus, QueryType, TypedValue,
};
pub use services::llm::{LlmClient, LlmError, OpenAiCompatClient};
pub use services::{
    CapabilityCache, CapabilityDetector, ConnectionConfig, EndpointPinger, EndpointProber,
    ErrorCategory, ErrorClassifier, ErrorContext, ExecutionOptions, Orchestrator,
    OrchestratorOptions, OrchestratorOutcome, QueryExecutor, QueryValidator, RetryEngine,
    SchemaInferencer, StatisticsCollector, ValidationReport,
};
pub use utils::{AgentError, AgentResult, StringExt};

/// Application shared state
///
/// Design Philosophy: Keep it simple - Rust's type system IS our DI container.
/// All long-lived services are wrapped in Arc for cheap cloning and thread
/// safety; the orchestrator borrows them per request.
pub struct AppContext {
    pub config: Config,
    pub orchestrator: Arc<Orchestrator>,
    pub pinger: Arc<EndpointPinger>,
    pub capability_cache: Arc<CapabilityCache>,
}

impl AppContext {
    /// Wire every service from a loaded configuration
    pub fn from_config(config: Config) -> Self {
        let llm: Arc<dyn LlmClient> = Arc::new(OpenAiCompatClient::new(config.llm_provider()));
        Self::with_llm(config, llm)
    }

    /// Wire with a caller-supplied LLM capability (tests, alternate backends)
    pub fn with_llm(config: Config, llm: Arc<dyn LlmClient>) -> Self {
        let capability_cache = Arc::new(CapabilityCache::with_ttl(Duration::from_secs(
            config.discovery.cache_ttl_hours * 60 * 60,
        )));

        let retry_engine = RetryEngine::new(
            QueryValidator::new(config.validation.strict),
            config.retry_policy(),
        );

        let executor: Arc<dyn services::SparqlExecutor> = Arc::new(QueryExecutor::new());

        let mut pinger = EndpointPinger::new(config.connection_config());
        if let Some(rate_limit) = &config.endpoint.rate_limit {
            pinger = pinger.with_rate_limit(rate_limit.requests_per_sec, rate_limit.burst);
        }

        let orchestrator = Arc::new(Orchestrator::new(
            llm,
            executor,
            retry_engine,
            capability_cache.clone(),
        ));

        Self { config, orchestrator, pinger: Arc::new(pinger), capability_cache }
    }

    /// Build a validated endpoint from a URL, carrying the configured
    /// per-endpoint settings
    pub fn endpoint_for(&self, url: &str) -> AgentResult<Endpoint> {
        let url = url
            .clean()
            .ok_or_else(|| AgentError::invalid_input("endpoint URL is empty"))?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AgentError::invalid_input(format!(
                "endpoint URL must be http(s), got '{}'",
                url
            )));
        }
        let mut endpoint = Endpoint::new(url);
        endpoint.timeout_secs = Some(self.config.endpoint.default_timeout_secs);
        endpoint.rate_limit = self.config.endpoint.rate_limit;
        Ok(endpoint)
    }

    /// Orchestrator options derived from the loaded configuration
    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            deadline: Duration::from_secs(self.config.endpoint.default_timeout_secs),
            execution: self.config.execution_options(),
            ensure_capabilities: self.config.discovery.collect_statistics,
            detection: self.config.detection_options(),
            schema: None,
            explain_results: true,
            explain_row_limit: 10,
        }
    }
}
