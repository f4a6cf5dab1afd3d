//! Prompt builders for the four LLM call sites in the pipeline:
//! initial generation, validation repair, execution-error repair, and
//! result explanation.

use std::fmt::Write as _;

use crate::models::{Binding, Capabilities, InferredSchema};
use crate::services::error_classifier::ErrorContext;
use crate::services::validator::{Severity, ValidationReport};

pub const GENERATION_SYSTEM_PROMPT: &str = include_str!("generation_prompt.md");

/// Canonical prefixes offered to the model in every generation prompt
pub const CANONICAL_PREFIXES: &[(&str, &str)] = &[
    ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
    ("rdfs", "http://www.w3.org/2000/01/rdf-schema#"),
    ("owl", "http://www.w3.org/2002/07/owl#"),
    ("xsd", "http://www.w3.org/2001/XMLSchema#"),
];

/// Schema grounding passed into generation/repair prompts
#[derive(Debug, Clone, Default)]
pub struct SchemaHints {
    pub capabilities: Option<Capabilities>,
    pub schema: Option<InferredSchema>,
}

impl SchemaHints {
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_none() && self.schema.is_none()
    }

    fn render(&self, out: &mut String) {
        if let Some(caps) = &self.capabilities {
            if let Some(version) = &caps.sparql_version {
                let _ = writeln!(out, "Endpoint SPARQL version: {}", version);
            }
            if !caps.namespaces.is_empty() {
                let _ = writeln!(out, "Known namespaces:");
                for (prefix, iri) in &caps.namespaces {
                    let _ = writeln!(out, "  PREFIX {}: <{}>", prefix, iri);
                }
            }
            if let Some(stats) = &caps.statistics {
                if !stats.top_classes.is_empty() {
                    let _ = writeln!(out, "Most common classes:");
                    for (iri, count) in stats.top_classes.iter().take(10) {
                        let _ = writeln!(out, "  <{}> ({} instances)", iri, count);
                    }
                }
                if !stats.top_properties.is_empty() {
                    let _ = writeln!(out, "Most common predicates:");
                    for (iri, count) in stats.top_properties.iter().take(10) {
                        let _ = writeln!(out, "  <{}> ({} uses)", iri, count);
                    }
                }
            }
        }
        if let Some(schema) = &self.schema {
            let shex = schema.to_shex();
            if !shex.is_empty() {
                let _ = writeln!(out, "Inferred shapes:\n{}", shex);
            }
        }
    }
}

/// Prompt for the initial query generation
pub fn generation_prompt(question: &str, hints: &SchemaHints) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Question: {}", question);
    let _ = writeln!(out, "\nCanonical prefixes you may rely on:");
    for (prefix, iri) in CANONICAL_PREFIXES {
        let _ = writeln!(out, "  PREFIX {}: <{}>", prefix, iri);
    }
    if !hints.is_empty() {
        let _ = writeln!(out, "\nEndpoint schema hints:");
        hints.render(&mut out);
    }
    let _ = write!(out, "\nWrite the SPARQL query that answers the question.");
    out
}

/// Prompt asking the model to repair a query that failed static validation
pub fn validation_repair_prompt(
    question: &str,
    candidate: &str,
    report: &ValidationReport,
    hints: &SchemaHints,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "The SPARQL query below fails validation. Fix it.");
    let _ = writeln!(out, "\nOriginal question: {}", question);
    let _ = writeln!(out, "\nCandidate query:\n{}", candidate);
    let _ = writeln!(out, "\nValidation errors:");
    for issue in report.issues_at(Severity::Error) {
        match (issue.line, issue.column) {
            (Some(line), Some(column)) => {
                let _ = writeln!(
                    out,
                    "- [{}] line {}, column {}: {}",
                    issue.rule, line, column, issue.message
                );
            },
            (Some(line), None) => {
                let _ = writeln!(out, "- [{}] line {}: {}", issue.rule, line, issue.message);
            },
            _ => {
                let _ = writeln!(out, "- [{}] {}", issue.rule, issue.message);
            },
        }
        if let Some(fix) = &issue.suggestion {
            let _ = writeln!(out, "  suggested fix: {}", fix);
        }
    }
    if !hints.is_empty() {
        let _ = writeln!(out, "\nEndpoint schema hints:");
        hints.render(&mut out);
    }
    let _ = write!(
        out,
        "\nReturn only the corrected SPARQL query, keeping the original intent."
    );
    out
}

/// Prompt asking the model to repair a query the endpoint rejected
pub fn error_repair_prompt(
    question: &str,
    candidate: &str,
    error: &ErrorContext,
    nearest_terms: &[String],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "The SPARQL query below was rejected by the endpoint. Fix it.");
    let _ = writeln!(out, "\nOriginal question: {}", question);
    let _ = writeln!(out, "\nFailing query:\n{}", candidate);
    let _ = writeln!(out, "\nEndpoint error ({}): {}", error.category.as_str(), error.message);
    if let Some(term) = error.offending_term() {
        let _ = writeln!(out, "Offending term: <{}>", term);
    }
    if !nearest_terms.is_empty() {
        let _ = writeln!(out, "Known terms on this endpoint you may substitute:");
        for term in nearest_terms {
            let _ = writeln!(out, "  {}", term);
        }
    }
    for suggestion in &error.suggestions {
        let _ = writeln!(out, "Hint: {}", suggestion);
    }
    let _ = write!(out, "\nReturn only the corrected SPARQL query.");
    out
}

/// Prompt asking the model to simplify a query that timed out
pub fn simplify_prompt(question: &str, candidate: &str, error: &ErrorContext) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "The SPARQL query below timed out on the endpoint. Produce a cheaper query \
         that still answers the question."
    );
    let _ = writeln!(out, "\nOriginal question: {}", question);
    let _ = writeln!(out, "\nSlow query:\n{}", candidate);
    if let Some(limit) = error.suggested_limit() {
        let _ = writeln!(out, "\nUse LIMIT {} or lower.", limit);
    }
    let _ = write!(
        out,
        "\nPrefer fewer OPTIONAL clauses, more selective patterns, and a LIMIT. \
         Return only the SPARQL query."
    );
    out
}

/// Prompt producing the natural-language summary of results
pub fn explanation_prompt(question: &str, variables: &[String], rows: &[Binding]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Summarize the following SPARQL results as a short answer to the question. \
         Answer in plain prose, no markdown."
    );
    let _ = writeln!(out, "\nQuestion: {}", question);
    let _ = writeln!(out, "Variables: {}", variables.join(", "));
    let _ = writeln!(out, "Rows ({} shown):", rows.len());
    for row in rows {
        let mut cells: Vec<String> = Vec::with_capacity(variables.len());
        for var in variables {
            let cell = row
                .get(var)
                .map(|v| v.value.clone())
                .unwrap_or_else(|| "-".to_string());
            cells.push(format!("{}={}", var, cell));
        }
        let _ = writeln!(out, "  {}", cells.join("  "));
    }
    out
}
