//! Query and result models for the SPARQL execution pipeline.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::services::error_classifier::ErrorContext;

pub const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
pub const RDF_LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";

static PREFIX_DECL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)PREFIX\s+([A-Za-z][\w-]*)?\s*:\s*<([^>]*)>").expect("prefix decl regex")
});

static VARIABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?$]([A-Za-z_][\w]*)").expect("variable regex"));

/// SPARQL query form
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryType {
    Select,
    Ask,
    Construct,
    Describe,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Ask => "ASK",
            Self::Construct => "CONSTRUCT",
            Self::Describe => "DESCRIBE",
        }
    }
}

/// A SPARQL query with its detected surface structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub query_type: QueryType,
    /// Declared prefix to IRI, in declaration order is irrelevant so kept sorted
    pub prefixes: BTreeMap<String, String>,
    /// Variables mentioned anywhere in the query, first-mention order, deduplicated
    pub variables: Vec<String>,
}

impl Query {
    /// Parse the surface structure of a query string.
    ///
    /// Returns `None` when no recognizable query form is present; deeper
    /// validation is the validator's job.
    pub fn parse(text: &str) -> Option<Self> {
        let query_type = detect_query_type(text)?;
        let prefixes = extract_prefixes(text);
        let variables = extract_variables(text);
        Some(Self { text: text.to_string(), query_type, prefixes, variables })
    }
}

/// Detect the query form keyword, ignoring leading PREFIX/BASE declarations
pub fn detect_query_type(text: &str) -> Option<QueryType> {
    let upper = text.to_uppercase();
    let mut earliest: Option<(usize, QueryType)> = None;
    for (kw, qt) in [
        ("SELECT", QueryType::Select),
        ("ASK", QueryType::Ask),
        ("CONSTRUCT", QueryType::Construct),
        ("DESCRIBE", QueryType::Describe),
    ] {
        if let Some(pos) = upper.find(kw) {
            match earliest {
                Some((best, _)) if best <= pos => {},
                _ => earliest = Some((pos, qt)),
            }
        }
    }
    earliest.map(|(_, qt)| qt)
}

/// Extract PREFIX declarations as a prefix-to-IRI map
pub fn extract_prefixes(text: &str) -> BTreeMap<String, String> {
    PREFIX_DECL_RE
        .captures_iter(text)
        .map(|cap| {
            let prefix = cap.get(1).map(|m| m.as_str()).unwrap_or("").to_string();
            (prefix, cap[2].to_string())
        })
        .collect()
}

/// Extract `?var`/`$var` mentions in first-mention order, deduplicated
pub fn extract_variables(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for cap in VARIABLE_RE.captures_iter(text) {
        let name = cap[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// RDF term kind of a binding value
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TermKind {
    Iri,
    Literal,
    BlankNode,
}

/// One decoded value from a SPARQL results binding
///
/// Invariant: a literal with a language tag has `datatype` of
/// `rdf:langString` or unset; the constructors enforce this.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypedValue {
    pub kind: TermKind,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl TypedValue {
    pub fn iri(value: impl Into<String>) -> Self {
        Self { kind: TermKind::Iri, value: value.into(), datatype: None, language: None }
    }

    pub fn blank(value: impl Into<String>) -> Self {
        Self { kind: TermKind::BlankNode, value: value.into(), datatype: None, language: None }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self { kind: TermKind::Literal, value: value.into(), datatype: None, language: None }
    }

    pub fn typed_literal(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self {
            kind: TermKind::Literal,
            value: value.into(),
            datatype: Some(datatype.into()),
            language: None,
        }
    }

    /// Language-tagged literal; the datatype is pinned to `rdf:langString`
    pub fn lang_literal(value: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            kind: TermKind::Literal,
            value: value.into(),
            datatype: Some(RDF_LANG_STRING.to_string()),
            language: Some(language.into()),
        }
    }

    pub fn is_literal(&self) -> bool {
        self.kind == TermKind::Literal
    }
}

/// Outcome status of one execution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Success,
    Failed,
    PartialSuccess,
    TimedOut,
}

/// One row of a SELECT result: projected variable to decoded value
pub type Binding = HashMap<String, TypedValue>;

/// Normalized result of executing a query
///
/// `variables` preserves `head.vars` order; `bindings` preserves server row
/// order. CONSTRUCT/DESCRIBE results are carried as a single synthetic
/// `graph` binding holding the opaque serialized graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub status: QueryStatus,
    pub variables: Vec<String>,
    pub bindings: Vec<Binding>,
    pub row_count: usize,
    pub execution_time_ms: u64,
    #[serde(default)]
    pub bytes_received: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorContext>,
}

impl QueryResult {
    pub fn failed(error: ErrorContext) -> Self {
        Self {
            status: QueryStatus::Failed,
            variables: Vec::new(),
            bindings: Vec::new(),
            row_count: 0,
            execution_time_ms: 0,
            bytes_received: 0,
            warnings: Vec::new(),
            error: Some(error),
        }
    }

    pub fn timed_out(error: ErrorContext) -> Self {
        Self { status: QueryStatus::TimedOut, ..Self::failed(error) }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, QueryStatus::Success | QueryStatus::PartialSuccess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_query_type_after_prefixes() {
        let q = "PREFIX foaf: <http://xmlns.com/foaf/0.1/>\nSELECT ?s WHERE { ?s a foaf:Person }";
        assert_eq!(detect_query_type(q), Some(QueryType::Select));
    }

    #[test]
    fn detects_ask_before_embedded_select_keyword() {
        let q = "ASK { ?s <http://ex.org/selectivity> ?o }";
        assert_eq!(detect_query_type(q), Some(QueryType::Ask));
    }

    #[test]
    fn extracts_prefixes_and_variables() {
        let q = "PREFIX rdfs: <http://www.w3.org/2000/01/rdf-schema#>\n\
                 SELECT ?s ?label WHERE { ?s rdfs:label ?label }";
        let prefixes = extract_prefixes(q);
        assert_eq!(
            prefixes.get("rdfs").map(String::as_str),
            Some("http://www.w3.org/2000/01/rdf-schema#")
        );
        assert_eq!(extract_variables(q), vec!["s", "label"]);
    }

    #[test]
    fn parses_surface_structure() {
        let q = Query::parse(
            "PREFIX foaf: <http://xmlns.com/foaf/0.1/>\n\
             SELECT ?name WHERE { ?p foaf:name ?name } LIMIT 5",
        )
        .expect("query form");
        assert_eq!(q.query_type, QueryType::Select);
        assert_eq!(q.prefixes.len(), 1);
        assert_eq!(q.variables, vec!["name", "p"]);

        assert!(Query::parse("this is not sparql").is_none());
    }

    #[test]
    fn lang_literal_pins_datatype() {
        let v = TypedValue::lang_literal("chat", "fr");
        assert_eq!(v.datatype.as_deref(), Some(RDF_LANG_STRING));
        assert_eq!(v.language.as_deref(), Some("fr"));
    }
}
