//! Error classification for SPARQL execution failures
//!
//! Data-driven: a static table of substring patterns maps server error text
//! to a category, severity, and retry strategy. HTTP status codes that are
//! unambiguous (401/403/429/408/504/502/503) short-circuit the table.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::utils::sparql_text;

// ============================================================================
// Error Taxonomy
// ============================================================================

/// Failure category for an execution error
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Syntax,
    Parse,
    Timeout,
    Network,
    RateLimit,
    Authentication,
    AccessDenied,
    EndpointUnavailable,
    UnknownTerm,
    Memory,
    QueryTooComplex,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Parse => "parse",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::Authentication => "authentication",
            Self::AccessDenied => "access_denied",
            Self::EndpointUnavailable => "endpoint_unavailable",
            Self::UnknownTerm => "unknown_term",
            Self::Memory => "memory",
            Self::QueryTooComplex => "query_too_complex",
            Self::Unknown => "unknown",
        }
    }
}

/// How a failed attempt should be retried, if at all
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    None,
    Immediate,
    LinearBackoff,
    ExponentialBackoff,
}

/// Classified execution error with remediation hints
///
/// `severity` is 1 (benign) to 10 (fatal). `metadata` carries extracted
/// hints such as `current_limit`, `suggested_limit`, `offending_term`, and
/// `retry_after_secs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub category: ErrorCategory,
    pub severity: u8,
    pub recoverable: bool,
    pub retry_strategy: RetryStrategy,
    pub message: String,
    pub suggestions: Vec<String>,
    pub technical_details: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ErrorContext {
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Parsed `suggested_limit` hint, when present
    pub fn suggested_limit(&self) -> Option<u64> {
        self.metadata.get("suggested_limit").and_then(|v| v.parse().ok())
    }

    /// Parsed `retry_after_secs` hint, when present
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.metadata.get("retry_after_secs").and_then(|v| v.parse().ok())
    }

    pub fn offending_term(&self) -> Option<&str> {
        self.metadata.get("offending_term").map(String::as_str)
    }
}

// ============================================================================
// Classification Table
// ============================================================================

struct ClassificationRule {
    /// Lowercase substrings; any match selects this rule
    patterns: &'static [&'static str],
    category: ErrorCategory,
    severity: u8,
    recoverable: bool,
    retry_strategy: RetryStrategy,
    suggestions: &'static [&'static str],
}

static RULES: &[ClassificationRule] = &[
    ClassificationRule {
        patterns: &["unknown predicate", "unknown property", "undefined prefix", "unknown term", "not a known", "no such predicate"],
        category: ErrorCategory::UnknownTerm,
        severity: 4,
        recoverable: true,
        retry_strategy: RetryStrategy::Immediate,
        suggestions: &[
            "Check the term IRI against the endpoint's discovered namespaces",
            "Use a predicate observed in the dataset statistics",
        ],
    },
    ClassificationRule {
        patterns: &["timeout", "timed out", "time limit", "deadline exceeded", "estimated execution time"],
        category: ErrorCategory::Timeout,
        severity: 6,
        recoverable: true,
        retry_strategy: RetryStrategy::ExponentialBackoff,
        suggestions: &[
            "Add or reduce a LIMIT clause",
            "Replace broad patterns with more selective ones",
            "Split the query into smaller parts",
        ],
    },
    ClassificationRule {
        patterns: &["out of memory", "memory exhausted", "result set too large", "too many results", "heap space"],
        category: ErrorCategory::Memory,
        severity: 6,
        recoverable: true,
        retry_strategy: RetryStrategy::Immediate,
        suggestions: &[
            "Add a LIMIT clause to bound the result size",
            "Remove DISTINCT to avoid server-side materialization",
        ],
    },
    ClassificationRule {
        patterns: &["syntax error", "parse error", "malformed query", "lexical error", "bad query", "querybadformed", "unexpected token"],
        category: ErrorCategory::Syntax,
        severity: 3,
        recoverable: true,
        retry_strategy: RetryStrategy::Immediate,
        suggestions: &[
            "Re-validate the query locally",
            "Check for unbalanced braces and unterminated strings",
        ],
    },
    ClassificationRule {
        patterns: &["rate limit", "too many requests", "quota exceeded", "throttl"],
        category: ErrorCategory::RateLimit,
        severity: 5,
        recoverable: true,
        retry_strategy: RetryStrategy::LinearBackoff,
        suggestions: &[
            "Wait before retrying",
            "Reduce request frequency against this endpoint",
        ],
    },
    ClassificationRule {
        patterns: &["unauthorized", "authentication failed", "invalid credentials", "api key"],
        category: ErrorCategory::Authentication,
        severity: 8,
        recoverable: false,
        retry_strategy: RetryStrategy::None,
        suggestions: &["Check the endpoint credentials configuration"],
    },
    ClassificationRule {
        patterns: &["forbidden", "access denied", "not allowed", "permission"],
        category: ErrorCategory::AccessDenied,
        severity: 8,
        recoverable: false,
        retry_strategy: RetryStrategy::None,
        suggestions: &["The endpoint rejected the request; verify access rights"],
    },
    ClassificationRule {
        patterns: &["service unavailable", "bad gateway", "maintenance", "temporarily unavailable", "overloaded"],
        category: ErrorCategory::EndpointUnavailable,
        severity: 7,
        recoverable: true,
        retry_strategy: RetryStrategy::ExponentialBackoff,
        suggestions: &[
            "Retry after a delay",
            "Fall back to an alternate endpoint if one is configured",
        ],
    },
    ClassificationRule {
        patterns: &["connection refused", "connection reset", "dns", "name resolution", "could not connect", "network unreachable", "broken pipe", "connection closed"],
        category: ErrorCategory::Network,
        severity: 7,
        recoverable: true,
        retry_strategy: RetryStrategy::ExponentialBackoff,
        suggestions: &[
            "Check network connectivity to the endpoint",
            "Retry with exponential backoff",
        ],
    },
    ClassificationRule {
        patterns: &["too complex", "complexity", "too many triple patterns", "query is too expensive"],
        category: ErrorCategory::QueryTooComplex,
        severity: 5,
        recoverable: true,
        retry_strategy: RetryStrategy::Immediate,
        suggestions: &[
            "Reduce the number of OPTIONAL clauses and joins",
            "Split the query into simpler parts",
        ],
    },
    ClassificationRule {
        patterns: &["invalid json", "unexpected response", "failed to parse response", "invalid content type"],
        category: ErrorCategory::Parse,
        severity: 4,
        recoverable: true,
        retry_strategy: RetryStrategy::Immediate,
        suggestions: &["Retry the request; the endpoint returned a malformed response"],
    },
];

static IRI_IN_MESSAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<?(https?://[^\s<>"']+)>?"#).expect("iri regex"));

/// Rule lookup by category; every category used in status mappings has
/// exactly one table entry.
fn rule_for(category: ErrorCategory) -> &'static ClassificationRule {
    RULES
        .iter()
        .find(|rule| rule.category == category)
        .expect("status-mapped category present in rule table")
}

// ============================================================================
// Classifier
// ============================================================================

/// Stateless classifier over the static rule table
#[derive(Debug, Default, Clone)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a server/transport error into an `ErrorContext`.
    ///
    /// `query` is the query that failed; when present, LIMIT hints are
    /// extracted into metadata so the retry engine can propose a concrete
    /// reduction.
    pub fn classify(
        &self,
        message: &str,
        http_status: Option<u16>,
        query: Option<&str>,
    ) -> ErrorContext {
        let lowered = message.to_lowercase();

        let mut context = self
            .status_shortcut(http_status, message)
            .or_else(|| self.match_rules(&lowered, message))
            .or_else(|| self.status_fallback(http_status, message))
            .unwrap_or_else(|| self.unknown(message));

        self.extract_metadata(&mut context, message, query);

        tracing::debug!(
            "Classified error as {} (severity {}, retry {:?}): {}",
            context.category.as_str(),
            context.severity,
            context.retry_strategy,
            message
        );

        context
    }

    /// Unambiguous HTTP statuses bypass the pattern table
    fn status_shortcut(&self, status: Option<u16>, message: &str) -> Option<ErrorContext> {
        let category = match status? {
            401 => ErrorCategory::Authentication,
            403 => ErrorCategory::AccessDenied,
            429 => ErrorCategory::RateLimit,
            408 | 504 => ErrorCategory::Timeout,
            502 | 503 => ErrorCategory::EndpointUnavailable,
            _ => return None,
        };
        Some(self.from_rule(rule_for(category), message))
    }

    fn match_rules(&self, lowered: &str, message: &str) -> Option<ErrorContext> {
        RULES
            .iter()
            .find(|rule| rule.patterns.iter().any(|p| lowered.contains(p)))
            .map(|rule| self.from_rule(rule, message))
    }

    /// Remaining statuses carry weaker signal: 400 is a server-side parse
    /// rejection, any other 5xx an unavailable endpoint.
    fn status_fallback(&self, status: Option<u16>, message: &str) -> Option<ErrorContext> {
        match status? {
            400 => Some(self.from_rule(rule_for(ErrorCategory::Syntax), message)),
            s if s >= 500 => {
                Some(self.from_rule(rule_for(ErrorCategory::EndpointUnavailable), message))
            },
            _ => None,
        }
    }

    fn from_rule(&self, rule: &ClassificationRule, message: &str) -> ErrorContext {
        ErrorContext {
            category: rule.category,
            severity: rule.severity,
            recoverable: rule.recoverable,
            retry_strategy: rule.retry_strategy,
            message: one_line_summary(rule.category, message),
            suggestions: rule.suggestions.iter().map(|s| s.to_string()).collect(),
            technical_details: message.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    fn unknown(&self, message: &str) -> ErrorContext {
        ErrorContext {
            category: ErrorCategory::Unknown,
            severity: 5,
            recoverable: true,
            retry_strategy: RetryStrategy::Immediate,
            message: one_line_summary(ErrorCategory::Unknown, message),
            suggestions: vec![
                "Retry once; if the error persists, inspect the technical details".to_string(),
            ],
            technical_details: message.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    fn extract_metadata(&self, context: &mut ErrorContext, message: &str, query: Option<&str>) {
        if let Some(query) = query
            && let Some(current) = sparql_text::find_limit(query)
        {
            context.metadata.insert("current_limit".to_string(), current.to_string());
            if matches!(context.category, ErrorCategory::Timeout | ErrorCategory::Memory) {
                let suggested = (current / 2).max(1);
                context.metadata.insert("suggested_limit".to_string(), suggested.to_string());
                context
                    .suggestions
                    .insert(0, format!("Retry with LIMIT {}", suggested));
            }
        }

        if context.category == ErrorCategory::UnknownTerm
            && let Some(cap) = IRI_IN_MESSAGE_RE.captures(message)
        {
            context.metadata.insert("offending_term".to_string(), cap[1].to_string());
        }
    }
}

/// Compact one-line human message, keeping full text in technical_details
fn one_line_summary(category: ErrorCategory, message: &str) -> String {
    let first_line = message.lines().next().unwrap_or("").trim();
    let clipped: String = first_line.chars().take(200).collect();
    let clipped = clipped.as_str();
    match category {
        ErrorCategory::Unknown => format!("Unclassified endpoint error: {}", clipped),
        _ => format!("{}: {}", category_label(category), clipped),
    }
}

fn category_label(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::Syntax => "Query syntax rejected by endpoint",
        ErrorCategory::Parse => "Malformed endpoint response",
        ErrorCategory::Timeout => "Query timed out",
        ErrorCategory::Network => "Network failure",
        ErrorCategory::RateLimit => "Rate limited",
        ErrorCategory::Authentication => "Authentication failed",
        ErrorCategory::AccessDenied => "Access denied",
        ErrorCategory::EndpointUnavailable => "Endpoint unavailable",
        ErrorCategory::UnknownTerm => "Unknown term in query",
        ErrorCategory::Memory => "Result too large",
        ErrorCategory::QueryTooComplex => "Query too complex",
        ErrorCategory::Unknown => "Unclassified endpoint error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_timeout_with_limit_hint() {
        let classifier = ErrorClassifier::new();
        let query = "SELECT * WHERE { ?s ?p ?o } LIMIT 1000";
        let ctx = classifier.classify("Query execution timeout", Some(504), Some(query));

        assert_eq!(ctx.category, ErrorCategory::Timeout);
        assert_eq!(ctx.retry_strategy, RetryStrategy::ExponentialBackoff);
        assert_eq!(ctx.suggested_limit(), Some(500));
        assert!(ctx.suggestions[0].contains("LIMIT 500"));
    }

    #[test]
    fn classifies_unknown_predicate_with_offending_term() {
        let classifier = ErrorClassifier::new();
        let ctx = classifier.classify(
            "Unknown predicate: http://example.org/unknownProp",
            Some(400),
            None,
        );

        assert_eq!(ctx.category, ErrorCategory::UnknownTerm);
        assert_eq!(ctx.offending_term(), Some("http://example.org/unknownProp"));
        assert_eq!(ctx.retry_strategy, RetryStrategy::Immediate);
    }

    #[test]
    fn status_shortcut_beats_pattern_table() {
        let classifier = ErrorClassifier::new();
        let ctx = classifier.classify("syntax error in request", Some(401), None);
        assert_eq!(ctx.category, ErrorCategory::Authentication);
        assert!(!ctx.recoverable);
        assert_eq!(ctx.retry_strategy, RetryStrategy::None);
    }

    #[test]
    fn bare_400_falls_back_to_syntax() {
        let classifier = ErrorClassifier::new();
        let ctx = classifier.classify("the request could not be processed", Some(400), None);
        assert_eq!(ctx.category, ErrorCategory::Syntax);
    }

    #[test]
    fn unmatched_message_is_unknown_with_bounded_retry() {
        let classifier = ErrorClassifier::new();
        let ctx = classifier.classify("zorp", None, None);
        assert_eq!(ctx.category, ErrorCategory::Unknown);
        assert!(ctx.recoverable);
        assert_eq!(ctx.retry_strategy, RetryStrategy::Immediate);
    }

    #[test]
    fn memory_error_detected_from_message() {
        let classifier = ErrorClassifier::new();
        let ctx = classifier.classify(
            "Out of memory: result set too large",
            Some(500),
            Some("SELECT * WHERE { ?s ?p ?o } LIMIT 10"),
        );
        assert_eq!(ctx.category, ErrorCategory::Memory);
        assert_eq!(ctx.suggested_limit(), Some(5));
    }
}
