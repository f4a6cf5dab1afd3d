//! SPARQL protocol query executor
//!
//! HTTP client for the SPARQL 1.1 Protocol: POST with
//! `application/sparql-query`, Accept negotiation by query form, GET
//! fallback on 405, and normalization of results JSON into `QueryResult`.
//! Failures are returned as `ExecutionError` carrying a classified
//! `ErrorContext` for the retry engine.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::models::{
    Binding, Endpoint, EndpointAuth, QueryResult, QueryStatus, QueryType, TypedValue, query,
};
use crate::services::error_classifier::{ErrorClassifier, ErrorContext};

pub const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";
pub const RDF_XML: &str = "application/rdf+xml";
pub const TURTLE: &str = "text/turtle";

/// Synthetic variable carrying the serialized graph of a CONSTRUCT/DESCRIBE
pub const GRAPH_VARIABLE: &str = "graph";

// ============================================================================
// Options / Error
// ============================================================================

/// Per-call execution options
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub timeout: Duration,
    /// Re-issue as GET with `?query=` when the endpoint answers 405 to POST
    pub retry_on_405: bool,
    pub user_agent: String,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_on_405: true,
            user_agent: concat!("quasar/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Execution failure carrying its classified context
#[derive(Debug, thiserror::Error)]
#[error("{}", context.message)]
pub struct ExecutionError {
    pub context: ErrorContext,
}

impl ExecutionError {
    pub fn new(context: ErrorContext) -> Self {
        Self { context }
    }
}

// ============================================================================
// Executor Seam
// ============================================================================

/// Execution seam consumed by the orchestrator and retry engine
///
/// The HTTP executor below is the production implementation; tests drive
/// the pipeline with scripted implementations.
#[async_trait]
pub trait SparqlExecutor: Send + Sync {
    async fn execute(
        &self,
        query_text: &str,
        endpoint: &Endpoint,
        options: &ExecutionOptions,
    ) -> Result<QueryResult, ExecutionError>;
}

// ============================================================================
// HTTP Executor
// ============================================================================

pub struct QueryExecutor {
    http_client: Client,
    classifier: ErrorClassifier,
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryExecutor {
    pub fn new() -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self { http_client, classifier: ErrorClassifier::new() }
    }

    /// Shared-client constructor so all components reuse one connection pool
    pub fn with_client(http_client: Client) -> Self {
        Self { http_client, classifier: ErrorClassifier::new() }
    }

    fn accept_header(query_type: QueryType) -> &'static str {
        match query_type {
            QueryType::Select | QueryType::Ask => SPARQL_RESULTS_JSON,
            QueryType::Construct | QueryType::Describe => RDF_XML,
        }
    }

    fn apply_auth(
        request: reqwest::RequestBuilder,
        endpoint: &Endpoint,
    ) -> reqwest::RequestBuilder {
        match &endpoint.auth {
            Some(EndpointAuth::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            },
            Some(EndpointAuth::Bearer { token }) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send_post(
        &self,
        query_text: &str,
        endpoint: &Endpoint,
        options: &ExecutionOptions,
        accept: &str,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let request = self
            .http_client
            .post(&endpoint.url)
            .header("Content-Type", "application/sparql-query")
            .header("Accept", format!("{}, {}", accept, TURTLE))
            .header("User-Agent", &options.user_agent)
            .timeout(options.timeout)
            .body(query_text.to_string());

        Self::apply_auth(request, endpoint).send().await
    }

    async fn send_get(
        &self,
        query_text: &str,
        endpoint: &Endpoint,
        options: &ExecutionOptions,
        accept: &str,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let url = format!(
            "{}?query={}",
            endpoint.url,
            urlencoding::encode(query_text)
        );
        let request = self
            .http_client
            .get(&url)
            .header("Accept", format!("{}, {}", accept, TURTLE))
            .header("User-Agent", &options.user_agent)
            .timeout(options.timeout);

        Self::apply_auth(request, endpoint).send().await
    }

    fn transport_error(
        &self,
        err: &reqwest::Error,
        query_text: &str,
        options: &ExecutionOptions,
    ) -> ExecutionError {
        let message = if err.is_timeout() {
            format!("Request timed out after {:?}", options.timeout)
        } else if err.is_connect() {
            format!("Could not connect to endpoint: {}", err)
        } else {
            format!("Transport error: {}", err)
        };
        ExecutionError::new(self.classifier.classify(&message, None, Some(query_text)))
    }

    fn parse_select_or_ask(
        &self,
        body: &str,
        query_type: QueryType,
        query_text: &str,
    ) -> Result<(Vec<String>, Vec<Binding>, Vec<String>), ExecutionError> {
        let parsed: SparqlJsonResponse = serde_json::from_str(body).map_err(|e| {
            ExecutionError::new(self.classifier.classify(
                &format!("Failed to parse response: invalid JSON: {}", e),
                None,
                Some(query_text),
            ))
        })?;

        let mut warnings = Vec::new();

        if query_type == QueryType::Ask {
            let value = parsed.boolean.ok_or_else(|| {
                ExecutionError::new(self.classifier.classify(
                    "Unexpected response: ASK result missing 'boolean' field",
                    None,
                    Some(query_text),
                ))
            })?;
            let mut row = HashMap::with_capacity(1);
            row.insert(
                "boolean".to_string(),
                TypedValue::typed_literal(value.to_string(), query::XSD_BOOLEAN),
            );
            return Ok((vec!["boolean".to_string()], vec![row], warnings));
        }

        let variables = parsed.head.vars;
        let mut bindings = Vec::with_capacity(parsed.results.bindings.len());
        for raw_row in parsed.results.bindings {
            let mut row: Binding = HashMap::with_capacity(raw_row.len());
            for (var, term) in raw_row {
                match decode_term(&term) {
                    Some(value) => {
                        row.insert(var, value);
                    },
                    None => warnings.push(format!(
                        "Skipped binding for ?{}: unknown term type '{}'",
                        var, term.kind
                    )),
                }
            }
            bindings.push(row);
        }

        Ok((variables, bindings, warnings))
    }
}

#[async_trait]
impl SparqlExecutor for QueryExecutor {
    async fn execute(
        &self,
        query_text: &str,
        endpoint: &Endpoint,
        options: &ExecutionOptions,
    ) -> Result<QueryResult, ExecutionError> {
        let query_type = query::detect_query_type(query_text).unwrap_or(QueryType::Select);
        let accept = Self::accept_header(query_type);
        let started = Instant::now();

        tracing::debug!(
            "Executing {} query against {} (timeout {:?})",
            query_type.as_str(),
            endpoint.url,
            options.timeout
        );

        let mut response = self
            .send_post(query_text, endpoint, options, accept)
            .await
            .map_err(|e| self.transport_error(&e, query_text, options))?;

        if response.status() == reqwest::StatusCode::METHOD_NOT_ALLOWED && options.retry_on_405 {
            tracing::debug!("POST returned 405, retrying as GET: {}", endpoint.url);
            response = self
                .send_get(query_text, endpoint, options, accept)
                .await
                .map_err(|e| self.transport_error(&e, query_text, options))?;
        }

        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let body = response.text().await.map_err(|e| {
            self.transport_error(&e, query_text, options)
        })?;
        let bytes_received = body.len() as u64;

        if !status.is_success() {
            tracing::warn!(
                "Query against {} failed with status {}: {}",
                endpoint.url,
                status,
                body.lines().next().unwrap_or("")
            );
            let mut context =
                self.classifier
                    .classify(&body, Some(status.as_u16()), Some(query_text));
            if let Some(secs) = retry_after {
                context = context.with_metadata("retry_after_secs", secs.to_string());
            }
            return Err(ExecutionError::new(context));
        }

        let (variables, bindings, warnings) = match query_type {
            QueryType::Select | QueryType::Ask => {
                self.parse_select_or_ask(&body, query_type, query_text)?
            },
            QueryType::Construct | QueryType::Describe => {
                // opaque graph passthrough in a single synthetic binding
                let mut row = HashMap::with_capacity(1);
                row.insert(GRAPH_VARIABLE.to_string(), TypedValue::literal(body));
                (vec![GRAPH_VARIABLE.to_string()], vec![row], Vec::new())
            },
        };

        let execution_time_ms = started.elapsed().as_millis() as u64;
        let row_count = bindings.len();

        tracing::debug!(
            "Query against {} returned {} rows in {}ms",
            endpoint.url,
            row_count,
            execution_time_ms
        );

        Ok(QueryResult {
            status: QueryStatus::Success,
            variables,
            bindings,
            row_count,
            execution_time_ms,
            bytes_received,
            warnings,
            error: None,
        })
    }
}

// ============================================================================
// SPARQL Results JSON (wire format)
// ============================================================================

// Unknown-field tolerance is deliberate here: endpoints attach vendor
// extensions to the results envelope.

#[derive(Debug, Deserialize)]
struct SparqlJsonResponse {
    #[serde(default)]
    head: JsonHead,
    #[serde(default)]
    results: JsonResults,
    #[serde(default)]
    boolean: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct JsonHead {
    #[serde(default)]
    vars: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct JsonResults {
    #[serde(default)]
    bindings: Vec<HashMap<String, JsonTerm>>,
}

#[derive(Debug, Deserialize)]
struct JsonTerm {
    #[serde(rename = "type")]
    kind: String,
    value: String,
    #[serde(default)]
    datatype: Option<String>,
    #[serde(default, rename = "xml:lang")]
    lang: Option<String>,
}

/// Decode one wire term; `typed-literal` is the Virtuoso spelling
fn decode_term(term: &JsonTerm) -> Option<TypedValue> {
    match term.kind.as_str() {
        "uri" | "iri" => Some(TypedValue::iri(term.value.clone())),
        "bnode" => Some(TypedValue::blank(term.value.clone())),
        "literal" | "typed-literal" => Some(match (&term.lang, &term.datatype) {
            (Some(lang), _) => TypedValue::lang_literal(term.value.clone(), lang.clone()),
            (None, Some(datatype)) => {
                TypedValue::typed_literal(term.value.clone(), datatype.clone())
            },
            (None, None) => TypedValue::literal(term.value.clone()),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TermKind;

    #[test]
    fn decodes_select_results_preserving_order() {
        let executor = QueryExecutor::new();
        let body = r#"{
            "head": { "vars": ["name", "age"] },
            "results": { "bindings": [
                { "name": { "type": "literal", "value": "Ada", "xml:lang": "en" },
                  "age": { "type": "typed-literal", "value": "36",
                           "datatype": "http://www.w3.org/2001/XMLSchema#integer" } },
                { "name": { "type": "uri", "value": "http://example.org/grace" } }
            ] }
        }"#;

        let (vars, bindings, warnings) = executor
            .parse_select_or_ask(body, QueryType::Select, "SELECT ?name ?age WHERE {}")
            .expect("parse");

        assert_eq!(vars, vec!["name", "age"]);
        assert_eq!(bindings.len(), 2);
        assert!(warnings.is_empty());

        let first = &bindings[0];
        assert_eq!(first["name"].language.as_deref(), Some("en"));
        assert_eq!(
            first["age"].datatype.as_deref(),
            Some("http://www.w3.org/2001/XMLSchema#integer")
        );
        assert_eq!(bindings[1]["name"].kind, TermKind::Iri);
    }

    #[test]
    fn decodes_ask_result_as_boolean_binding() {
        let executor = QueryExecutor::new();
        let body = r#"{ "head": {}, "boolean": true }"#;

        let (vars, bindings, _) = executor
            .parse_select_or_ask(body, QueryType::Ask, "ASK {}")
            .expect("parse");

        assert_eq!(vars, vec!["boolean"]);
        assert_eq!(bindings[0]["boolean"].value, "true");
        assert_eq!(bindings[0]["boolean"].datatype.as_deref(), Some(query::XSD_BOOLEAN));
    }

    #[test]
    fn tolerates_unknown_term_types_with_warning() {
        let executor = QueryExecutor::new();
        let body = r#"{
            "head": { "vars": ["x"] },
            "results": { "bindings": [
                { "x": { "type": "triple", "value": "weird" } }
            ] }
        }"#;

        let (_, bindings, warnings) = executor
            .parse_select_or_ask(body, QueryType::Select, "SELECT ?x WHERE {}")
            .expect("parse");

        assert!(bindings[0].is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn invalid_json_classifies_as_parse_error() {
        use crate::services::error_classifier::ErrorCategory;

        let executor = QueryExecutor::new();
        let err = executor
            .parse_select_or_ask("<html>not json</html>", QueryType::Select, "SELECT ?x WHERE {}")
            .expect_err("must fail");
        assert_eq!(err.context.category, ErrorCategory::Parse);
    }
}
