//! Endpoint capability discovery
//!
//! Runs an ordered catalog of probe queries against a known-reachable
//! endpoint and assembles a `Capabilities` record: SPARQL version, feature
//! flags, named graphs, namespaces, supported functions, and (optionally)
//! dataset statistics. Probes adapt their per-probe timeout to observed
//! latency under a fixed overall budget; detection itself never fails.

pub mod capability_cache;
pub mod statistics;

pub use capability_cache::CapabilityCache;
pub use statistics::{StatisticsCollector, StatisticsOptions, namespace_of};

use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::{Capabilities, Endpoint, EndpointAuth, SparqlFeature};

/// Invoked at each probe boundary with (step, total, message); must not block
pub type ProgressCallback = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;

// ============================================================================
// Options
// ============================================================================

#[derive(Clone)]
pub struct DetectionOptions {
    pub overall_timeout: Duration,
    /// Halve every timeout, skip statistics and function probes
    pub fast_mode: bool,
    /// Adapt per-probe timeouts to observed latency
    pub progressive_timeout: bool,
    pub collect_statistics: bool,
    pub statistics: StatisticsOptions,
    /// LIMIT for named-graph enumeration
    pub graph_limit: usize,
    /// Sample size for namespace discovery
    pub namespace_sample: usize,
    pub user_agent: String,
    pub on_progress: Option<ProgressCallback>,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            overall_timeout: Duration::from_secs(60),
            fast_mode: false,
            progressive_timeout: true,
            collect_statistics: false,
            statistics: StatisticsOptions::default(),
            graph_limit: 100,
            namespace_sample: 200,
            user_agent: concat!("quasar/", env!("CARGO_PKG_VERSION")).to_string(),
            on_progress: None,
        }
    }
}

impl std::fmt::Debug for DetectionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionOptions")
            .field("overall_timeout", &self.overall_timeout)
            .field("fast_mode", &self.fast_mode)
            .field("progressive_timeout", &self.progressive_timeout)
            .field("collect_statistics", &self.collect_statistics)
            .field("graph_limit", &self.graph_limit)
            .field("namespace_sample", &self.namespace_sample)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

// ============================================================================
// Probe Catalog
// ============================================================================

const RDFS_PREFIX: &str = "PREFIX rdfs: <http://www.w3.org/2000/01/rdf-schema#>\n";

/// Feature probes, executed in catalog order
const FEATURE_PROBES: &[(SparqlFeature, &str, &str)] = &[
    (
        SparqlFeature::Optional,
        "feature-optional",
        "SELECT ?s WHERE { ?s ?p ?o OPTIONAL { ?s ?q ?r } } LIMIT 1",
    ),
    (
        SparqlFeature::Union,
        "feature-union",
        "SELECT ?s WHERE { { ?s ?p ?o } UNION { ?o ?p ?s } } LIMIT 1",
    ),
    (
        SparqlFeature::Filter,
        "feature-filter",
        "SELECT ?s WHERE { ?s ?p ?o FILTER(BOUND(?s)) } LIMIT 1",
    ),
    (SparqlFeature::Bind, "feature-bind", "SELECT ?v WHERE { BIND(1 AS ?v) }"),
    (
        SparqlFeature::GroupBy,
        "feature-group-by",
        "SELECT ?p (COUNT(?s) AS ?n) WHERE { ?s ?p ?o } GROUP BY ?p HAVING (COUNT(?s) > 0) LIMIT 1",
    ),
    (
        SparqlFeature::Subquery,
        "feature-subquery",
        "SELECT ?s WHERE { { SELECT ?s WHERE { ?s ?p ?o } LIMIT 1 } } LIMIT 1",
    ),
    (
        SparqlFeature::PropertyPaths,
        "feature-property-paths",
        // prefix prepended at probe time
        "SELECT ?s WHERE { ?s a/rdfs:subClassOf* ?c } LIMIT 1",
    ),
    (
        SparqlFeature::Federation,
        "feature-service",
        "SELECT ?s WHERE { SERVICE <http://example.org/sparql> { ?s ?p ?o } } LIMIT 0",
    ),
];

/// Function probes: success iff the endpoint parses and answers
const FUNCTION_PROBES: &[(&str, &str)] = &[
    ("STRSTARTS", "SELECT (STRSTARTS(\"ab\", \"a\") AS ?x) WHERE {}"),
    ("REGEX", "SELECT (REGEX(\"ab\", \"^a\") AS ?x) WHERE {}"),
    ("NOW", "SELECT (NOW() AS ?x) WHERE {}"),
    ("CONCAT", "SELECT (CONCAT(\"a\", \"b\") AS ?x) WHERE {}"),
    ("STRLEN", "SELECT (STRLEN(\"ab\") AS ?x) WHERE {}"),
    ("UCASE", "SELECT (UCASE(\"ab\") AS ?x) WHERE {}"),
];

/// Conventional prefixes for well-known namespaces
const WELL_KNOWN_NAMESPACES: &[(&str, &str)] = &[
    ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
    ("rdfs", "http://www.w3.org/2000/01/rdf-schema#"),
    ("owl", "http://www.w3.org/2002/07/owl#"),
    ("xsd", "http://www.w3.org/2001/XMLSchema#"),
    ("foaf", "http://xmlns.com/foaf/0.1/"),
    ("skos", "http://www.w3.org/2004/02/skos/core#"),
    ("dcterms", "http://purl.org/dc/terms/"),
    ("schema", "http://schema.org/"),
];

enum ProbeOutcome {
    Success { body: Value, content_type: Option<String> },
    TimedOut,
    Failed(String),
}

// ============================================================================
// Detector
// ============================================================================

pub struct CapabilityDetector {
    http_client: Client,
}

impl Default for CapabilityDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityDetector {
    pub fn new() -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");
        Self { http_client }
    }

    pub fn with_client(http_client: Client) -> Self {
        Self { http_client }
    }

    /// Detect capabilities for a reachable endpoint.
    ///
    /// Probe failures and timeouts are recorded in the result; the call
    /// itself always returns a `Capabilities`.
    pub async fn detect(&self, endpoint: &Endpoint, options: &DetectionOptions) -> Capabilities {
        let started = Instant::now();
        let mut caps = Capabilities::new(&endpoint.url);
        let mut schedule = ProbeSchedule::new(options, total_probes(options));

        tracing::info!(
            "Detecting capabilities for {} (budget {:?}, fast_mode={})",
            endpoint.url,
            options.overall_timeout,
            options.fast_mode
        );

        // 1. version probes
        self.version_probes(endpoint, options, &mut schedule, &mut caps).await;

        // 2. feature probes
        for (feature, name, query) in FEATURE_PROBES {
            let query = if *feature == SparqlFeature::PropertyPaths {
                format!("{}{}", RDFS_PREFIX, query)
            } else {
                (*query).to_string()
            };
            match self.run_probe(endpoint, options, &mut schedule, name, &query).await {
                Some(ProbeOutcome::Success { .. }) => {
                    caps.features.insert(*feature);
                },
                Some(ProbeOutcome::TimedOut) => caps.timed_out_probes.push((*name).to_string()),
                Some(ProbeOutcome::Failed(reason)) => {
                    tracing::debug!("Probe {} failed on {}: {}", name, endpoint.url, reason);
                    caps.failed_probes.push((*name).to_string());
                },
                None => caps.timed_out_probes.push((*name).to_string()),
            }
        }

        // 3. named graphs
        let graph_query = format!(
            "SELECT DISTINCT ?g WHERE {{ GRAPH ?g {{ }} }} LIMIT {}",
            options.graph_limit
        );
        match self
            .run_probe(endpoint, options, &mut schedule, "named-graphs", &graph_query)
            .await
        {
            Some(ProbeOutcome::Success { body, .. }) => {
                caps.named_graphs = binding_values(&body, "g");
            },
            Some(ProbeOutcome::TimedOut) | None => {
                caps.timed_out_probes.push("named-graphs".to_string());
            },
            Some(ProbeOutcome::Failed(_)) => caps.failed_probes.push("named-graphs".to_string()),
        }

        // 4. namespace discovery
        let predicate_query = format!(
            "SELECT ?p WHERE {{ ?s ?p ?o }} LIMIT {}",
            options.namespace_sample
        );
        match self
            .run_probe(endpoint, options, &mut schedule, "namespaces", &predicate_query)
            .await
        {
            Some(ProbeOutcome::Success { body, .. }) => {
                caps.namespaces = rank_namespaces(&binding_values(&body, "p"));
            },
            Some(ProbeOutcome::TimedOut) | None => {
                caps.timed_out_probes.push("namespaces".to_string());
            },
            Some(ProbeOutcome::Failed(_)) => caps.failed_probes.push("namespaces".to_string()),
        }

        // 5. function probes (skipped in fast mode)
        if !options.fast_mode {
            for (name, query) in FUNCTION_PROBES {
                let probe_name = format!("function-{}", name.to_lowercase());
                match self
                    .run_probe(endpoint, options, &mut schedule, &probe_name, query)
                    .await
                {
                    Some(ProbeOutcome::Success { .. }) => {
                        caps.supported_functions.push((*name).to_string());
                    },
                    Some(ProbeOutcome::TimedOut) | None => {
                        caps.timed_out_probes.push(probe_name);
                    },
                    Some(ProbeOutcome::Failed(_)) => caps.failed_probes.push(probe_name),
                }
            }
        }

        // 6. statistics (skipped in fast mode)
        if options.collect_statistics && !options.fast_mode {
            schedule.report("statistics", "collecting dataset statistics");
            let collector =
                StatisticsCollector::with_client(self.http_client.clone(), options.statistics.clone());
            caps.statistics = Some(collector.collect(endpoint).await);
        }

        caps.detection_duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Capability detection for {} finished in {}ms: {} features, {} timed out, {} failed",
            endpoint.url,
            caps.detection_duration_ms,
            caps.features.len(),
            caps.timed_out_probes.len(),
            caps.failed_probes.len()
        );
        caps
    }

    async fn version_probes(
        &self,
        endpoint: &Endpoint,
        options: &DetectionOptions,
        schedule: &mut ProbeSchedule,
        caps: &mut Capabilities,
    ) {
        match self
            .run_probe(
                endpoint,
                options,
                schedule,
                "version-basic",
                "SELECT (1 AS ?v) WHERE {}",
            )
            .await
        {
            Some(ProbeOutcome::Success { content_type, .. }) => {
                caps.sparql_version = Some("1.0".to_string());
                if let Some(ct) = content_type {
                    push_unique(&mut caps.result_formats, ct);
                }
            },
            Some(ProbeOutcome::TimedOut) | None => {
                caps.timed_out_probes.push("version-basic".to_string());
            },
            Some(ProbeOutcome::Failed(_)) => caps.failed_probes.push("version-basic".to_string()),
        }

        // VALUES is 1.1-only; a successful parse marks the endpoint 1.1
        match self
            .run_probe(
                endpoint,
                options,
                schedule,
                "version-1.1",
                "SELECT ?v WHERE { VALUES ?v { 1 } }",
            )
            .await
        {
            Some(ProbeOutcome::Success { content_type, .. }) => {
                caps.sparql_version = Some("1.1".to_string());
                if let Some(ct) = content_type {
                    push_unique(&mut caps.result_formats, ct);
                }
            },
            Some(ProbeOutcome::TimedOut) | None => {
                caps.timed_out_probes.push("version-1.1".to_string());
            },
            Some(ProbeOutcome::Failed(_)) => caps.failed_probes.push("version-1.1".to_string()),
        }
    }

    /// Run one probe under the schedule. `None` means the overall budget was
    /// already exhausted and the probe never started.
    async fn run_probe(
        &self,
        endpoint: &Endpoint,
        options: &DetectionOptions,
        schedule: &mut ProbeSchedule,
        name: &str,
        query: &str,
    ) -> Option<ProbeOutcome> {
        let timeout = schedule.next_timeout()?;
        schedule.report(name, &format!("probing {}", name));

        let started = Instant::now();
        let outcome = self.send(endpoint, options, query, timeout).await;
        schedule.observe(started.elapsed());

        Some(outcome)
    }

    async fn send(
        &self,
        endpoint: &Endpoint,
        options: &DetectionOptions,
        query: &str,
        timeout: Duration,
    ) -> ProbeOutcome {
        let request = self
            .http_client
            .post(&endpoint.url)
            .header("Content-Type", "application/sparql-query")
            .header("Accept", "application/sparql-results+json")
            .header("User-Agent", &options.user_agent)
            .timeout(timeout)
            .body(query.to_string());

        let request = match &endpoint.auth {
            Some(EndpointAuth::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            },
            Some(EndpointAuth::Bearer { token }) => request.bearer_auth(token),
            None => request,
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return ProbeOutcome::TimedOut,
            Err(e) => return ProbeOutcome::Failed(e.to_string()),
        };

        let status = response.status();
        // a rate-limited probe is not a detection success
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return ProbeOutcome::Failed("rate limited (HTTP 429)".to_string());
        }
        if !status.is_success() {
            return ProbeOutcome::Failed(format!("HTTP {}", status.as_u16()));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

        match response.json::<Value>().await {
            Ok(body) => ProbeOutcome::Success { body, content_type },
            Err(e) => ProbeOutcome::Failed(format!("non-JSON response: {}", e)),
        }
    }
}

fn total_probes(options: &DetectionOptions) -> usize {
    let mut total = 2 + FEATURE_PROBES.len() + 2; // versions, features, graphs, namespaces
    if !options.fast_mode {
        total += FUNCTION_PROBES.len();
    }
    total
}

// ============================================================================
// Progressive Timeout Schedule
// ============================================================================

/// Per-probe budget tracker.
///
/// Base timeout is `min(5s, overall / n_probes)`. With progressive mode the
/// next probe gets `clamp(max(base, 2 * median(observed)), base, remaining)`.
/// Fast mode halves everything.
struct ProbeSchedule {
    base: Duration,
    overall: Duration,
    progressive: bool,
    started: Instant,
    observed: Vec<Duration>,
    step: usize,
    total: usize,
    on_progress: Option<ProgressCallback>,
}

impl ProbeSchedule {
    fn new(options: &DetectionOptions, total: usize) -> Self {
        let overall = if options.fast_mode {
            options.overall_timeout / 2
        } else {
            options.overall_timeout
        };
        let n = total.max(1) as u32;
        let mut base = (overall / n).min(Duration::from_secs(5));
        if options.fast_mode {
            base /= 2;
        }
        Self {
            base: base.max(Duration::from_millis(100)),
            overall,
            progressive: options.progressive_timeout,
            started: Instant::now(),
            observed: Vec::new(),
            step: 0,
            total,
            on_progress: options.on_progress.clone(),
        }
    }

    /// Budget for the next probe, `None` when the overall budget is spent
    fn next_timeout(&mut self) -> Option<Duration> {
        let elapsed = self.started.elapsed();
        if elapsed >= self.overall {
            return None;
        }
        let remaining = self.overall - elapsed;

        if !self.progressive {
            return Some(self.base.min(remaining));
        }

        let candidate = match self.median_observed() {
            Some(median) => (median * 2).max(self.base),
            None => self.base,
        };
        Some(candidate.clamp(self.base.min(remaining), remaining))
    }

    fn observe(&mut self, elapsed: Duration) {
        self.observed.push(elapsed);
    }

    fn median_observed(&self) -> Option<Duration> {
        if self.observed.is_empty() {
            return None;
        }
        let mut sorted = self.observed.clone();
        sorted.sort();
        Some(sorted[sorted.len() / 2])
    }

    fn report(&mut self, _name: &str, message: &str) {
        self.step += 1;
        if let Some(callback) = &self.on_progress {
            callback(self.step.min(self.total), self.total, message);
        }
    }
}

// ============================================================================
// Result helpers
// ============================================================================

fn binding_values(body: &Value, var: &str) -> Vec<String> {
    body.get("results")
        .and_then(|r| r.get("bindings"))
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    row.get(var)
                        .and_then(|t| t.get("value"))
                        .and_then(Value::as_str)
                        .map(String::from)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Rank sampled predicate IRIs by namespace frequency and assign prefixes:
/// conventional ones for well-known namespaces, `ns1`, `ns2`, ... for the
/// rest in descending frequency order.
fn rank_namespaces(predicates: &[String]) -> BTreeMap<String, String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for predicate in predicates {
        if let Some(ns) = namespace_of(predicate) {
            match counts.iter_mut().find(|(existing, _)| existing == ns) {
                Some((_, count)) => *count += 1,
                None => counts.push((ns.to_string(), 1)),
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut namespaces = BTreeMap::new();
    let mut generated = 0usize;
    for (ns, _) in counts {
        let prefix = match WELL_KNOWN_NAMESPACES.iter().find(|(_, iri)| *iri == ns) {
            Some((prefix, _)) => (*prefix).to_string(),
            None => {
                generated += 1;
                format!("ns{}", generated)
            },
        };
        namespaces.insert(prefix, ns);
    }
    namespaces
}

fn push_unique(formats: &mut Vec<String>, value: String) {
    if !formats.contains(&value) {
        formats.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_namespaces_with_wellknown_and_generated_prefixes() {
        let predicates = vec![
            "http://xmlns.com/foaf/0.1/name".to_string(),
            "http://xmlns.com/foaf/0.1/knows".to_string(),
            "http://example.org/vocab/weight".to_string(),
        ];
        let namespaces = rank_namespaces(&predicates);
        assert_eq!(
            namespaces.get("foaf").map(String::as_str),
            Some("http://xmlns.com/foaf/0.1/")
        );
        assert_eq!(
            namespaces.get("ns1").map(String::as_str),
            Some("http://example.org/vocab/")
        );
    }

    #[test]
    fn schedule_base_is_bounded_by_budget_share() {
        let options = DetectionOptions {
            overall_timeout: Duration::from_secs(10),
            progressive_timeout: false,
            ..DetectionOptions::default()
        };
        let mut schedule = ProbeSchedule::new(&options, 20);
        let timeout = schedule.next_timeout().expect("budget available");
        assert!(timeout <= Duration::from_millis(500));
    }

    #[test]
    fn progressive_timeout_tracks_median_and_remaining_budget() {
        let options = DetectionOptions {
            overall_timeout: Duration::from_secs(60),
            progressive_timeout: true,
            ..DetectionOptions::default()
        };
        let mut schedule = ProbeSchedule::new(&options, 10);
        schedule.observe(Duration::from_secs(4));
        schedule.observe(Duration::from_secs(4));
        schedule.observe(Duration::from_secs(4));

        let next = schedule.next_timeout().expect("budget available");
        // 2 * median = 8s, above base, below remaining budget
        assert!(next >= Duration::from_secs(7) && next <= Duration::from_secs(9));
        // never exceeds remaining total budget
        assert!(next <= Duration::from_secs(60));
    }

    #[test]
    fn exhausted_budget_skips_probes() {
        let options = DetectionOptions {
            overall_timeout: Duration::from_millis(0),
            ..DetectionOptions::default()
        };
        let mut schedule = ProbeSchedule::new(&options, 10);
        assert!(schedule.next_timeout().is_none());
    }

    #[test]
    fn fast_mode_halves_budgets() {
        let slow = ProbeSchedule::new(
            &DetectionOptions {
                overall_timeout: Duration::from_secs(40),
                fast_mode: false,
                ..DetectionOptions::default()
            },
            4,
        );
        let fast = ProbeSchedule::new(
            &DetectionOptions {
                overall_timeout: Duration::from_secs(40),
                fast_mode: true,
                ..DetectionOptions::default()
            },
            4,
        );
        assert!(fast.overall < slow.overall);
        assert!(fast.base < slow.base);
    }
}
