//! Static SPARQL query validation
//!
//! Purely textual checks, no network: delimiter balance, prefix hygiene,
//! projection binding, IRI well-formedness, and style warnings. Validation
//! is pure and idempotent; the same query text always yields the same
//! report.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::query::{self, QueryType};

// ============================================================================
// Issue / Report Types
// ============================================================================

/// Issue severity; a report with any Error is invalid
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// One validation finding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub severity: Severity,
    /// Stable rule id, e.g. "undeclared-prefix"
    pub rule: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    /// Offending query fragment, when one can be isolated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragment: Option<String>,
    /// Ready-to-apply fix, when one is known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Ordered findings plus summary counts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
    pub is_valid: bool,
    pub error_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
}

impl ValidationReport {
    fn from_issues(mut issues: Vec<ValidationIssue>) -> Self {
        issues.sort_by(|a, b| {
            a.severity
                .cmp(&b.severity)
                .then(a.line.unwrap_or(usize::MAX).cmp(&b.line.unwrap_or(usize::MAX)))
        });
        let error_count = issues.iter().filter(|i| i.severity == Severity::Error).count();
        let warning_count = issues.iter().filter(|i| i.severity == Severity::Warning).count();
        let info_count = issues.iter().filter(|i| i.severity == Severity::Info).count();
        Self { is_valid: error_count == 0, issues, error_count, warning_count, info_count }
    }

    pub fn issues_at(&self, severity: Severity) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }
}

// ============================================================================
// Validator
// ============================================================================

/// Prefixes accepted implicitly when used without a declaration
const IMPLICIT_PREFIXES: &[(&str, &str)] = &[
    ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
    ("rdfs", "http://www.w3.org/2000/01/rdf-schema#"),
    ("xsd", "http://www.w3.org/2001/XMLSchema#"),
    ("owl", "http://www.w3.org/2002/07/owl#"),
];

/// Well-known namespaces we can suggest a PREFIX line for
const KNOWN_NAMESPACES: &[(&str, &str)] = &[
    ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
    ("rdfs", "http://www.w3.org/2000/01/rdf-schema#"),
    ("xsd", "http://www.w3.org/2001/XMLSchema#"),
    ("owl", "http://www.w3.org/2002/07/owl#"),
    ("foaf", "http://xmlns.com/foaf/0.1/"),
    ("skos", "http://www.w3.org/2004/02/skos/core#"),
    ("dcterms", "http://purl.org/dc/terms/"),
    ("dc", "http://purl.org/dc/elements/1.1/"),
    ("schema", "http://schema.org/"),
    ("dbo", "http://dbpedia.org/ontology/"),
    ("dbr", "http://dbpedia.org/resource/"),
    ("dbp", "http://dbpedia.org/property/"),
    ("wd", "http://www.wikidata.org/entity/"),
    ("wdt", "http://www.wikidata.org/prop/direct/"),
];

static PNAME_USE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[\s(|/^,;{])([A-Za-z][\w-]*):[\w%.-]").expect("pname regex"));

static IRI_TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([^<>]*)>").expect("iri regex"));

static IRI_SCHEME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*:").expect("scheme regex"));

static AS_ALIAS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bAS\s+[?$](\w+)").expect("alias regex"));

static ORDER_BY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bORDER\s+BY\b").expect("order"));
static LIMIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bLIMIT\s+\d+").expect("limit"));
static SELECT_STAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bSELECT\s+(?:DISTINCT\s+|REDUCED\s+)?\*").expect("star"));

/// Static query validator
///
/// Strict mode raises implicit-prefix acceptance to an error and adds the
/// style warnings (SELECT *, single-use variables).
#[derive(Debug, Clone)]
pub struct QueryValidator {
    strict: bool,
}

impl Default for QueryValidator {
    fn default() -> Self {
        Self::new(false)
    }
}

impl QueryValidator {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    pub fn validate(&self, text: &str) -> ValidationReport {
        let mut issues = Vec::new();

        if text.trim().is_empty() {
            issues.push(ValidationIssue {
                severity: Severity::Error,
                rule: "empty-query".to_string(),
                message: "Query is empty".to_string(),
                line: None,
                column: None,
                fragment: None,
                suggestion: None,
            });
            return ValidationReport::from_issues(issues);
        }

        let query_type = query::detect_query_type(text);
        if query_type.is_none() {
            issues.push(ValidationIssue {
                severity: Severity::Error,
                rule: "unknown-query-form".to_string(),
                message: "No SELECT, ASK, CONSTRUCT, or DESCRIBE form found".to_string(),
                line: None,
                column: None,
                fragment: None,
                suggestion: None,
            });
        }

        let scan = scan_delimiters(text);
        issues.extend(scan.issues);

        // Masked text keeps offsets but blanks string/IRI interiors, so the
        // lexical checks below cannot trip on literal content.
        let masked = mask_literals(text, true);
        let string_masked = mask_literals(text, false);

        self.check_iris(&string_masked, &mut issues);
        self.check_prefixes(text, &masked, &mut issues);
        if query_type == Some(QueryType::Select) {
            self.check_projection(text, &masked, &mut issues);
        }
        self.check_variable_usage(&masked, query_type, &mut issues);
        self.check_style(text, &mut issues);

        ValidationReport::from_issues(issues)
    }

    // ========================================
    // IRI checks
    // ========================================

    fn check_iris(&self, text: &str, issues: &mut Vec<ValidationIssue>) {
        for cap in IRI_TOKEN_RE.captures_iter(text) {
            let iri = &cap[1];
            // a bracketed token with whitespace and no scheme separator is a
            // pair of comparison operators, not an IRI
            if iri.chars().any(char::is_whitespace) && !iri.contains("://") {
                continue;
            }
            let offset = cap.get(1).map(|m| m.start()).unwrap_or(0);
            let (line, column) = line_col(text, offset);

            let illegal: Vec<char> = iri
                .chars()
                .filter(|c| matches!(c, ',' | ' ' | '\t' | '\n' | '{' | '}' | '"' | '|' | '\\' | '^' | '`'))
                .collect();

            if !illegal.is_empty() {
                let encoded = percent_encode_illegal(iri);
                issues.push(ValidationIssue {
                    severity: Severity::Error,
                    rule: "malformed-iri".to_string(),
                    message: format!(
                        "IRI contains illegal character{} ({}): <{}>",
                        if illegal.len() > 1 { "s" } else { "" },
                        illegal
                            .iter()
                            .map(|c| format!("'{}'", c))
                            .collect::<Vec<_>>()
                            .join(", "),
                        iri
                    ),
                    line: Some(line),
                    column: Some(column),
                    fragment: Some(format!("<{}>", iri)),
                    suggestion: Some(format!("<{}>", encoded)),
                });
                continue;
            }

            if !IRI_SCHEME_RE.is_match(iri) {
                issues.push(ValidationIssue {
                    severity: Severity::Error,
                    rule: "malformed-iri".to_string(),
                    message: format!("IRI has no scheme: <{}>", iri),
                    line: Some(line),
                    column: Some(column),
                    fragment: Some(format!("<{}>", iri)),
                    suggestion: None,
                });
            }
        }
    }

    // ========================================
    // Prefix checks
    // ========================================

    fn check_prefixes(&self, text: &str, masked: &str, issues: &mut Vec<ValidationIssue>) {
        let declared = query::extract_prefixes(text);
        let used = used_prefixes(masked);

        for (prefix, offset) in &used {
            if declared.contains_key(prefix) {
                continue;
            }
            let (line, column) = line_col(text, *offset);
            if let Some((_, iri)) = IMPLICIT_PREFIXES.iter().find(|(p, _)| *p == prefix.as_str()) {
                let severity = if self.strict { Severity::Error } else { Severity::Warning };
                issues.push(ValidationIssue {
                    severity,
                    rule: "undeclared-prefix".to_string(),
                    message: format!(
                        "Prefix '{}' used without declaration (well-known, accepted implicitly)",
                        prefix
                    ),
                    line: Some(line),
                    column: Some(column),
                    fragment: None,
                    suggestion: Some(format!("PREFIX {}: <{}>", prefix, iri)),
                });
            } else {
                let suggestion = KNOWN_NAMESPACES
                    .iter()
                    .find(|(p, _)| *p == prefix.as_str())
                    .map(|(p, iri)| format!("PREFIX {}: <{}>", p, iri));
                issues.push(ValidationIssue {
                    severity: Severity::Error,
                    rule: "undeclared-prefix".to_string(),
                    message: format!("Prefix '{}' is used but never declared", prefix),
                    line: Some(line),
                    column: Some(column),
                    fragment: None,
                    suggestion,
                });
            }
        }

        for (prefix, _) in &declared {
            if prefix.is_empty() {
                continue;
            }
            if !used.iter().any(|(p, _)| p == prefix) {
                issues.push(ValidationIssue {
                    severity: Severity::Warning,
                    rule: "unused-prefix".to_string(),
                    message: format!("Prefix '{}' is declared but never used", prefix),
                    line: None,
                    column: None,
                    fragment: None,
                    suggestion: None,
                });
            }
        }
    }

    // ========================================
    // Projection checks
    // ========================================

    fn check_projection(&self, text: &str, masked: &str, issues: &mut Vec<ValidationIssue>) {
        let Some((projection, body)) = split_projection(masked) else {
            return;
        };
        if projection.contains('*') {
            return;
        }

        let aliases: Vec<String> = AS_ALIAS_RE
            .captures_iter(projection)
            .map(|cap| cap[1].to_string())
            .collect();
        let body_vars = query::extract_variables(body);

        for var in query::extract_variables(projection) {
            if aliases.contains(&var) || body_vars.contains(&var) {
                continue;
            }
            let (line, column) = find_variable(text, &var)
                .map(|off| line_col(text, off))
                .map(|(l, c)| (Some(l), Some(c)))
                .unwrap_or((None, None));
            issues.push(ValidationIssue {
                severity: Severity::Error,
                rule: "unbound-projection".to_string(),
                message: format!("Projected variable ?{} never appears in the WHERE pattern", var),
                line,
                column,
                fragment: None,
                suggestion: None,
            });
        }
    }

    // ========================================
    // Variable usage warnings
    // ========================================

    fn check_variable_usage(
        &self,
        masked: &str,
        query_type: Option<QueryType>,
        issues: &mut Vec<ValidationIssue>,
    ) {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for var in all_variable_mentions(masked) {
            *counts.entry(var).or_insert(0) += 1;
        }

        let projected: Vec<String> = split_projection(masked)
            .map(|(projection, _)| query::extract_variables(projection))
            .unwrap_or_default();

        for (var, count) in &counts {
            if *count != 1 {
                continue;
            }
            if query_type == Some(QueryType::Select) && !projected.contains(var) {
                issues.push(ValidationIssue {
                    severity: Severity::Warning,
                    rule: "unused-variable".to_string(),
                    message: format!("Variable ?{} is bound once and never reused", var),
                    line: None,
                    column: None,
                    fragment: None,
                    suggestion: None,
                });
            } else if self.strict {
                issues.push(ValidationIssue {
                    severity: Severity::Warning,
                    rule: "single-use-variable".to_string(),
                    message: format!("Variable ?{} appears only once", var),
                    line: None,
                    column: None,
                    fragment: None,
                    suggestion: None,
                });
            }
        }
    }

    // ========================================
    // Style warnings
    // ========================================

    fn check_style(&self, text: &str, issues: &mut Vec<ValidationIssue>) {
        if self.strict && SELECT_STAR_RE.is_match(text) {
            issues.push(ValidationIssue {
                severity: Severity::Warning,
                rule: "select-star".to_string(),
                message: "SELECT * projects every variable; name the ones you need".to_string(),
                line: None,
                column: None,
                fragment: None,
                suggestion: None,
            });
        }

        if ORDER_BY_RE.is_match(text) && !LIMIT_RE.is_match(text) {
            issues.push(ValidationIssue {
                severity: Severity::Info,
                rule: "order-without-limit".to_string(),
                message: "ORDER BY without LIMIT sorts the full result set".to_string(),
                line: None,
                column: None,
                fragment: None,
                suggestion: Some("Add a LIMIT clause".to_string()),
            });
        }
    }
}

// ============================================================================
// Lexical Scanning
// ============================================================================

struct DelimiterScan {
    issues: Vec<ValidationIssue>,
}

/// Scan for balanced (), [], {} and terminated strings, honoring SPARQL
/// string forms, IRI tokens, and # comments.
fn scan_delimiters(text: &str) -> DelimiterScan {
    let bytes: Vec<char> = text.chars().collect();
    let mut issues = Vec::new();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            '#' => {
                // comment runs to end of line
                while i < bytes.len() && bytes[i] != '\n' {
                    i += 1;
                }
            },
            '<' => {
                // '<' opens an IRI only when a '>' closes it before any
                // whitespace; otherwise it is a comparison operator.
                match iri_close(&bytes, i) {
                    Some(end) => i = end + 1,
                    None => {
                        let rest: String = bytes[i + 1..]
                            .iter()
                            .take_while(|c| !c.is_whitespace())
                            .collect();
                        if rest.contains("://") {
                            let (line, column) = line_col(text, char_offset_to_byte(text, i));
                            issues.push(ValidationIssue {
                                severity: Severity::Error,
                                rule: "malformed-iri".to_string(),
                                message: "Unterminated IRI (missing '>')".to_string(),
                                line: Some(line),
                                column: Some(column),
                                fragment: None,
                                suggestion: None,
                            });
                        }
                        i += 1;
                    },
                }
            },
            '"' | '\'' => {
                let quote = c;
                let triple = bytes.get(i + 1) == Some(&quote) && bytes.get(i + 2) == Some(&quote);
                let start = i;
                i += if triple { 3 } else { 1 };
                let mut terminated = false;
                while i < bytes.len() {
                    if bytes[i] == '\\' {
                        i += 2;
                        continue;
                    }
                    if triple {
                        if bytes[i] == quote
                            && bytes.get(i + 1) == Some(&quote)
                            && bytes.get(i + 2) == Some(&quote)
                        {
                            i += 3;
                            terminated = true;
                            break;
                        }
                    } else if bytes[i] == quote {
                        i += 1;
                        terminated = true;
                        break;
                    } else if bytes[i] == '\n' {
                        break;
                    }
                    i += 1;
                }
                if !terminated {
                    let (line, column) = line_col(text, char_offset_to_byte(text, start));
                    issues.push(ValidationIssue {
                        severity: Severity::Error,
                        rule: "unterminated-string".to_string(),
                        message: "String literal is never closed".to_string(),
                        line: Some(line),
                        column: Some(column),
                        fragment: None,
                        suggestion: None,
                    });
                }
            },
            '(' | '[' | '{' => {
                stack.push((c, i));
                i += 1;
            },
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {},
                    other => {
                        let (line, column) = line_col(text, char_offset_to_byte(text, i));
                        issues.push(ValidationIssue {
                            severity: Severity::Error,
                            rule: "unbalanced-delimiters".to_string(),
                            message: match other {
                                Some((open, _)) => {
                                    format!("Mismatched delimiter: expected closer for '{}', found '{}'", open, c)
                                },
                                None => format!("Unmatched '{}'", c),
                            },
                            line: Some(line),
                            column: Some(column),
                            fragment: None,
                            suggestion: None,
                        });
                        // resynchronize: drop the unmatched closer
                    },
                }
                i += 1;
            },
            _ => i += 1,
        }
    }

    for (open, pos) in stack {
        let (line, column) = line_col(text, char_offset_to_byte(text, pos));
        issues.push(ValidationIssue {
            severity: Severity::Error,
            rule: "unbalanced-delimiters".to_string(),
            message: format!("'{}' is never closed", open),
            line: Some(line),
            column: Some(column),
            fragment: None,
            suggestion: None,
        });
    }

    DelimiterScan { issues }
}

/// Blank out string literal interiors (and IRI interiors when `mask_iris`),
/// preserving offsets
fn mask_literals(text: &str, mask_iris: bool) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out: Vec<char> = chars.clone();
    let mut i = 0usize;

    while i < chars.len() {
        match chars[i] {
            '<' if mask_iris => match iri_close(&chars, i) {
                Some(end) => {
                    for slot in out.iter_mut().take(end).skip(i + 1) {
                        *slot = ' ';
                    }
                    i = end + 1;
                },
                None => i += 1,
            },
            '"' | '\'' => {
                let quote = chars[i];
                let triple = chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote);
                let start = i;
                i += if triple { 3 } else { 1 };
                while i < chars.len() {
                    if chars[i] == '\\' {
                        i += 2;
                        continue;
                    }
                    if triple {
                        if chars[i] == quote
                            && chars.get(i + 1) == Some(&quote)
                            && chars.get(i + 2) == Some(&quote)
                        {
                            i += 3;
                            break;
                        }
                    } else if chars[i] == quote || chars[i] == '\n' {
                        i += 1;
                        break;
                    }
                    i += 1;
                }
                let end = i.min(chars.len());
                for slot in out.iter_mut().take(end.saturating_sub(1)).skip(start + 1) {
                    if *slot != '\n' {
                        *slot = ' ';
                    }
                }
            },
            _ => i += 1,
        }
    }

    out.into_iter().collect()
}

/// Prefix usages (name, byte offset) in masked text, excluding declarations
fn used_prefixes(masked: &str) -> Vec<(String, usize)> {
    let mut found: Vec<(String, usize)> = Vec::new();
    for cap in PNAME_USE_RE.captures_iter(masked) {
        let m = cap.get(1).expect("pname group");
        let name = m.as_str().to_string();
        // skip the PREFIX declarations themselves
        let decl_window = masked[..m.start()].trim_end();
        if decl_window.to_uppercase().ends_with("PREFIX") {
            continue;
        }
        if name.eq_ignore_ascii_case("a") {
            continue;
        }
        if !found.iter().any(|(n, _)| n == &name) {
            found.push((name, m.start()));
        }
    }
    found
}

/// Split a SELECT query into (projection clause, body)
fn split_projection(masked: &str) -> Option<(&str, &str)> {
    let upper = masked.to_uppercase();
    let select = upper.find("SELECT")?;
    let after = select + "SELECT".len();
    let brace = masked.get(after..)?.find('{').map(|p| p + after)?;
    let where_kw = upper.get(after..brace).and_then(|s| s.find("WHERE")).map(|p| p + after);
    let projection_end = where_kw.unwrap_or(brace);
    Some((masked.get(after..projection_end)?, masked.get(brace..)?))
}

/// Every `?var` mention, including repeats
fn all_variable_mentions(masked: &str) -> Vec<String> {
    static RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[?$](\w+)").expect("var regex"));
    RE.captures_iter(masked).map(|cap| cap[1].to_string()).collect()
}

fn find_variable(text: &str, var: &str) -> Option<usize> {
    let needle = format!("?{}", var);
    text.find(&needle)
}

/// Index of the '>' closing an IRI opened at `open`, when one exists
/// before any whitespace
fn iri_close(chars: &[char], open: usize) -> Option<usize> {
    let mut j = open + 1;
    while j < chars.len() && !chars[j].is_whitespace() {
        if chars[j] == '>' {
            return Some(j);
        }
        j += 1;
    }
    None
}

/// 1-based (line, column) for a byte offset
fn line_col(text: &str, offset: usize) -> (usize, usize) {
    let mut clamped = offset.min(text.len());
    while clamped > 0 && !text.is_char_boundary(clamped) {
        clamped -= 1;
    }
    let before = &text[..clamped];
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().map(|s| s.chars().count()).unwrap_or(0) + 1;
    (line, column)
}

fn char_offset_to_byte(text: &str, char_offset: usize) -> usize {
    text.char_indices()
        .nth(char_offset)
        .map(|(b, _)| b)
        .unwrap_or(text.len())
}

fn percent_encode_illegal(iri: &str) -> String {
    iri.chars()
        .map(|c| match c {
            ',' => "%2C".to_string(),
            ' ' => "%20".to_string(),
            '{' => "%7B".to_string(),
            '}' => "%7D".to_string(),
            '"' => "%22".to_string(),
            '|' => "%7C".to_string(),
            '\\' => "%5C".to_string(),
            '^' => "%5E".to_string(),
            '`' => "%60".to_string(),
            _ => c.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(text: &str) -> ValidationReport {
        QueryValidator::new(false).validate(text)
    }

    #[test]
    fn valid_query_passes() {
        let report = validate(
            "PREFIX foaf: <http://xmlns.com/foaf/0.1/>\n\
             SELECT ?name WHERE { ?person foaf:name ?name } LIMIT 10",
        );
        assert!(report.is_valid, "unexpected issues: {:?}", report.issues);
    }

    #[test]
    fn report_is_invalid_iff_errors_present() {
        let bad = validate("SELECT ?s WHERE { ?s ?p ?o");
        assert!(!bad.is_valid);
        assert!(bad.error_count > 0);

        let warn_only = validate(
            "PREFIX foaf: <http://xmlns.com/foaf/0.1/>\n\
             PREFIX dc: <http://purl.org/dc/elements/1.1/>\n\
             SELECT ?name WHERE { ?p foaf:name ?name } LIMIT 5",
        );
        assert!(warn_only.is_valid);
        assert!(warn_only.warning_count > 0); // unused dc prefix
    }

    #[test]
    fn detects_unbalanced_braces() {
        let report = validate("SELECT ?s WHERE { ?s ?p ?o } }");
        assert!(report.issues.iter().any(|i| i.rule == "unbalanced-delimiters"));
    }

    #[test]
    fn detects_unterminated_string() {
        let report = validate("SELECT ?s WHERE { ?s ?p \"broken }");
        assert!(report.issues.iter().any(|i| i.rule == "unterminated-string"));
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let report = validate("SELECT ?s WHERE { ?s ?p \"a { b } c\" }");
        assert!(
            !report.issues.iter().any(|i| i.rule == "unbalanced-delimiters"),
            "{:?}",
            report.issues
        );
    }

    #[test]
    fn undeclared_unknown_prefix_is_error() {
        let report = validate("SELECT ?s WHERE { ?s zzz:thing ?o }");
        let issue = report
            .issues
            .iter()
            .find(|i| i.rule == "undeclared-prefix")
            .expect("undeclared prefix issue");
        assert_eq!(issue.severity, Severity::Error);
    }

    #[test]
    fn undeclared_wellknown_prefix_is_warning_with_fix() {
        let report = validate("SELECT ?s WHERE { ?s rdfs:label ?o }");
        let issue = report
            .issues
            .iter()
            .find(|i| i.rule == "undeclared-prefix")
            .expect("undeclared prefix issue");
        assert_eq!(issue.severity, Severity::Warning);
        assert!(issue.suggestion.as_deref().unwrap().starts_with("PREFIX rdfs:"));
        assert!(report.is_valid);
    }

    #[test]
    fn strict_mode_raises_implicit_prefix_to_error() {
        let report = QueryValidator::new(true).validate("SELECT ?s WHERE { ?s rdfs:label ?o }");
        assert!(!report.is_valid);
    }

    #[test]
    fn comma_in_iri_is_error_with_encoded_suggestion() {
        let report = validate(
            "SELECT ?p WHERE { ?p <http://dbpedia.org/ontology/birthPlace> \
             <http://dbpedia.org/resource/Santa_Cruz,_California> }",
        );
        let issue = report
            .issues
            .iter()
            .find(|i| i.rule == "malformed-iri")
            .expect("malformed iri issue");
        assert_eq!(issue.severity, Severity::Error);
        assert!(issue.suggestion.as_deref().unwrap().contains("Santa_Cruz%2C_California"));
    }

    #[test]
    fn projection_variable_must_appear_in_body() {
        let report = validate("SELECT ?name WHERE { ?s ?p ?o } LIMIT 1");
        assert!(report.issues.iter().any(|i| i.rule == "unbound-projection"));
        assert!(!report.is_valid);
    }

    #[test]
    fn as_alias_counts_as_bound() {
        let report =
            validate("SELECT (COUNT(?s) AS ?n) WHERE { ?s ?p ?o } GROUP BY ?p");
        assert!(
            !report.issues.iter().any(|i| i.rule == "unbound-projection"),
            "{:?}",
            report.issues
        );
    }

    #[test]
    fn order_by_without_limit_is_info() {
        let report = validate("SELECT ?s WHERE { ?s ?p ?o } ORDER BY ?s");
        let issue = report
            .issues
            .iter()
            .find(|i| i.rule == "order-without-limit")
            .expect("order-without-limit");
        assert_eq!(issue.severity, Severity::Info);
        assert!(report.is_valid);
    }

    #[test]
    fn strict_mode_warns_on_select_star() {
        let report = QueryValidator::new(true).validate("SELECT * WHERE { ?s ?p ?o } LIMIT 5");
        assert!(report.issues.iter().any(|i| i.rule == "select-star"));
    }

    #[test]
    fn validation_is_idempotent() {
        let q = "SELECT ?s WHERE { ?s ?p ?o } LIMIT 1";
        let a = validate(q);
        let b = validate(q);
        assert_eq!(a.issues, b.issues);
        assert_eq!(a.is_valid, b.is_valid);
    }
}
