//! Textual SPARQL helpers shared by the retry engine and classifier
//!
//! These operate on query text without a full parse; all rewrites are
//! suffix/keyword level and keep the rest of the query byte-identical.

use once_cell::sync::Lazy;
use regex::Regex;

static LIMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bLIMIT\s+(\d+)").expect("limit regex"));

static DISTINCT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bSELECT\s+DISTINCT\b").expect("distinct regex"));

static CODE_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:sparql)?\s*(.*?)```").expect("code fence regex"));

/// Extract the current `LIMIT n` value, if any
pub fn find_limit(query: &str) -> Option<u64> {
    LIMIT_RE
        .captures(query)
        .and_then(|cap| cap[1].parse().ok())
}

/// Replace an existing `LIMIT n`, or append one when absent
pub fn set_limit(query: &str, limit: u64) -> String {
    if LIMIT_RE.is_match(query) {
        LIMIT_RE
            .replace(query, format!("LIMIT {}", limit))
            .into_owned()
    } else {
        format!("{} LIMIT {}", query.trim_end(), limit)
    }
}

/// Halve an existing LIMIT (floor 1), or inject a default when absent
pub fn reduce_limit(query: &str, default_limit: u64) -> String {
    match find_limit(query) {
        Some(n) => set_limit(query, (n / 2).max(1)),
        None => set_limit(query, default_limit),
    }
}

/// Suggested reduced limit for a query, per the timeout remediation rule
pub fn suggested_limit(query: &str) -> Option<u64> {
    find_limit(query).map(|n| (n / 2).max(1))
}

/// Drop a `SELECT DISTINCT` down to plain `SELECT`
pub fn remove_distinct(query: &str) -> String {
    DISTINCT_RE.replace(query, "SELECT").into_owned()
}

/// Pull a bare SPARQL query out of an LLM reply.
///
/// Accepts a fenced ```sparql block, a plain fenced block, or raw text that
/// starts with a query keyword after trimming prose. Returns `None` when no
/// query form can be found.
pub fn extract_query_text(reply: &str) -> Option<String> {
    if let Some(cap) = CODE_FENCE_RE.captures(reply) {
        let inner = cap[1].trim();
        if !inner.is_empty() {
            return Some(inner.to_string());
        }
    }

    let trimmed = reply.trim();
    let upper = trimmed.to_uppercase();
    for kw in ["PREFIX", "BASE", "SELECT", "ASK", "CONSTRUCT", "DESCRIBE"] {
        if upper.starts_with(kw) {
            return Some(trimmed.to_string());
        }
    }

    // Last resort: find the first query keyword mid-text and take the rest
    for kw in ["PREFIX ", "SELECT ", "ASK ", "CONSTRUCT ", "DESCRIBE "] {
        if let Some(pos) = upper.find(kw) {
            return Some(trimmed[pos..].trim().to_string());
        }
    }

    None
}
