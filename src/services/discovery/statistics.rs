//! Dataset statistics collection
//!
//! Builds `DatasetStatistics` from parameterized COUNT/GROUP BY queries with
//! per-query linear-backoff retry and an in-run response cache. Individual
//! query failures become warnings; collection itself never fails.

use reqwest::Client;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::{Duration, Instant};

use crate::models::{DatasetStatistics, DetectedPatterns, Endpoint, EndpointAuth};

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone)]
pub struct StatisticsOptions {
    /// LIMIT for the top-classes ranking
    pub class_limit: usize,
    /// LIMIT for the top-properties ranking
    pub property_limit: usize,
    /// LIMIT for datatype/language histogram queries
    pub sample_limit: usize,
    pub query_timeout: Duration,
    /// Retries per query beyond the first attempt, linear backoff
    pub max_query_retries: u32,
    pub retry_delay: Duration,
    pub user_agent: String,
}

impl Default for StatisticsOptions {
    fn default() -> Self {
        Self {
            class_limit: 100,
            property_limit: 100,
            sample_limit: 1000,
            query_timeout: Duration::from_secs(15),
            max_query_retries: 2,
            retry_delay: Duration::from_millis(500),
            user_agent: concat!("quasar/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

// ============================================================================
// Namespace Extraction
// ============================================================================

/// Namespace of an IRI: everything up to and including the last '#' when one
/// exists, else up to and including the last '/'.
///
/// A hash wins even when a '/' follows it, so
/// `http://ex.org/hash#frag/x` yields `http://ex.org/hash#`.
pub fn namespace_of(iri: &str) -> Option<&str> {
    if let Some(pos) = iri.rfind('#') {
        return Some(&iri[..=pos]);
    }
    iri.rfind('/').map(|pos| &iri[..=pos])
}

// ============================================================================
// Collector
// ============================================================================

pub struct StatisticsCollector {
    http_client: Client,
    options: StatisticsOptions,
}

impl StatisticsCollector {
    pub fn new(options: StatisticsOptions) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");
        Self { http_client, options }
    }

    pub fn with_client(http_client: Client, options: StatisticsOptions) -> Self {
        Self { http_client, options }
    }

    /// Collect statistics for one endpoint.
    ///
    /// Every query result is cached for the duration of this call, keyed by
    /// a hash of query text and endpoint URL.
    pub async fn collect(&self, endpoint: &Endpoint) -> DatasetStatistics {
        let started = Instant::now();
        let mut run = CollectionRun::new();
        let mut stats = DatasetStatistics::default();

        tracing::info!("Collecting dataset statistics for {}", endpoint.url);

        stats.total_triples = self
            .count_query(endpoint, &mut run, "SELECT (COUNT(*) AS ?count) WHERE { ?s ?p ?o }")
            .await
            .unwrap_or_else(|w| {
                stats.warnings.push(w);
                None
            });
        stats.distinct_subjects = self
            .count_query(
                endpoint,
                &mut run,
                "SELECT (COUNT(DISTINCT ?s) AS ?count) WHERE { ?s ?p ?o }",
            )
            .await
            .unwrap_or_else(|w| {
                stats.warnings.push(w);
                None
            });
        stats.distinct_predicates = self
            .count_query(
                endpoint,
                &mut run,
                "SELECT (COUNT(DISTINCT ?p) AS ?count) WHERE { ?s ?p ?o }",
            )
            .await
            .unwrap_or_else(|w| {
                stats.warnings.push(w);
                None
            });
        stats.distinct_objects = self
            .count_query(
                endpoint,
                &mut run,
                "SELECT (COUNT(DISTINCT ?o) AS ?count) WHERE { ?s ?p ?o }",
            )
            .await
            .unwrap_or_else(|w| {
                stats.warnings.push(w);
                None
            });
        stats.distinct_classes = self
            .count_query(
                endpoint,
                &mut run,
                "SELECT (COUNT(DISTINCT ?class) AS ?count) WHERE { ?s a ?class }",
            )
            .await
            .unwrap_or_else(|w| {
                stats.warnings.push(w);
                None
            });

        match self.ranking_query(endpoint, &mut run, "class", self.options.class_limit).await {
            Ok(ranked) => stats.top_classes = ranked,
            Err(w) => stats.warnings.push(w),
        }
        match self
            .ranking_query(endpoint, &mut run, "property", self.options.property_limit)
            .await
        {
            Ok(ranked) => stats.top_properties = ranked,
            Err(w) => stats.warnings.push(w),
        }

        match self.datatype_histogram(endpoint, &mut run).await {
            Ok(histogram) => stats.datatype_distribution = histogram,
            Err(w) => stats.warnings.push(w),
        }
        match self.language_histogram(endpoint, &mut run).await {
            Ok(histogram) => stats.language_distribution = histogram,
            Err(w) => stats.warnings.push(w),
        }

        stats.namespace_usage = namespace_usage(&stats.top_properties);
        stats.patterns = self.detect_patterns(endpoint, &mut run).await;

        stats.collection_duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Statistics for {} collected in {}ms ({} warnings)",
            endpoint.url,
            stats.collection_duration_ms,
            stats.warnings.len()
        );
        stats
    }

    // ========================================
    // Query shapes
    // ========================================

    async fn count_query(
        &self,
        endpoint: &Endpoint,
        run: &mut CollectionRun,
        query: &str,
    ) -> Result<Option<u64>, String> {
        let body = self.execute_cached(endpoint, run, query).await?;
        Ok(first_binding_value(&body, "count").and_then(|v| v.parse().ok()))
    }

    async fn ranking_query(
        &self,
        endpoint: &Endpoint,
        run: &mut CollectionRun,
        kind: &str,
        limit: usize,
    ) -> Result<Vec<(String, u64)>, String> {
        let query = match kind {
            "class" => format!(
                "SELECT ?class (COUNT(?s) AS ?count) WHERE {{ ?s a ?class }} \
                 GROUP BY ?class ORDER BY DESC(?count) LIMIT {}",
                limit
            ),
            _ => format!(
                "SELECT ?property (COUNT(*) AS ?count) WHERE {{ ?s ?property ?o }} \
                 GROUP BY ?property ORDER BY DESC(?count) LIMIT {}",
                limit
            ),
        };
        let var = if kind == "class" { "class" } else { "property" };
        let body = self.execute_cached(endpoint, run, &query).await?;

        let mut ranked = Vec::new();
        for row in bindings(&body) {
            let iri = row
                .get(var)
                .and_then(|t| t.get("value"))
                .and_then(Value::as_str);
            let count = row
                .get("count")
                .and_then(|t| t.get("value"))
                .and_then(Value::as_str)
                .and_then(|v| v.parse::<u64>().ok());
            if let (Some(iri), Some(count)) = (iri, count) {
                ranked.push((iri.to_string(), count));
            }
        }
        Ok(ranked)
    }

    async fn datatype_histogram(
        &self,
        endpoint: &Endpoint,
        run: &mut CollectionRun,
    ) -> Result<BTreeMap<String, u64>, String> {
        let query = format!(
            "SELECT ?dt (COUNT(?o) AS ?count) WHERE {{ \
             {{ SELECT ?o WHERE {{ ?s ?p ?o FILTER(isLiteral(?o)) }} LIMIT {} }} \
             BIND(DATATYPE(?o) AS ?dt) }} GROUP BY ?dt",
            self.options.sample_limit
        );
        let body = self.execute_cached(endpoint, run, &query).await?;
        Ok(histogram_from(&body, "dt"))
    }

    async fn language_histogram(
        &self,
        endpoint: &Endpoint,
        run: &mut CollectionRun,
    ) -> Result<BTreeMap<String, u64>, String> {
        let query = format!(
            "SELECT ?lang (COUNT(?o) AS ?count) WHERE {{ \
             {{ SELECT ?o WHERE {{ ?s ?p ?o FILTER(isLiteral(?o)) }} LIMIT {} }} \
             BIND(LANG(?o) AS ?lang) FILTER(?lang != \"\") }} GROUP BY ?lang",
            self.options.sample_limit
        );
        let body = self.execute_cached(endpoint, run, &query).await?;
        Ok(histogram_from(&body, "lang"))
    }

    async fn detect_patterns(
        &self,
        endpoint: &Endpoint,
        run: &mut CollectionRun,
    ) -> DetectedPatterns {
        DetectedPatterns {
            has_owl_ontology: self
                .ask(endpoint, run, "ASK { ?s a <http://www.w3.org/2002/07/owl#Ontology> }")
                .await,
            has_labels: self
                .ask(
                    endpoint,
                    run,
                    "ASK { ?s <http://www.w3.org/2000/01/rdf-schema#label> ?o }",
                )
                .await,
            has_sameas: self
                .ask(endpoint, run, "ASK { ?s <http://www.w3.org/2002/07/owl#sameAs> ?o }")
                .await,
            has_skos: self
                .ask(
                    endpoint,
                    run,
                    "ASK { ?s a <http://www.w3.org/2004/02/skos/core#Concept> }",
                )
                .await,
            has_dublin_core: self
                .ask(endpoint, run, "ASK { ?s <http://purl.org/dc/terms/title> ?o }")
                .await,
        }
    }

    async fn ask(&self, endpoint: &Endpoint, run: &mut CollectionRun, query: &str) -> bool {
        match self.execute_cached(endpoint, run, query).await {
            Ok(body) => body.get("boolean").and_then(Value::as_bool).unwrap_or(false),
            Err(_) => false,
        }
    }

    // ========================================
    // Transport with cache + retry
    // ========================================

    async fn execute_cached(
        &self,
        endpoint: &Endpoint,
        run: &mut CollectionRun,
        query: &str,
    ) -> Result<Value, String> {
        let key = run.cache_key(&endpoint.url, query);
        if let Some(cached) = run.cache.get(&key) {
            tracing::debug!("Statistics cache hit for query against {}", endpoint.url);
            return Ok(cached.clone());
        }

        let mut last_error = String::new();
        let attempts = self.options.max_query_retries + 1;
        for attempt in 1..=attempts {
            match self.execute_once(endpoint, query).await {
                Ok(body) => {
                    run.cache.insert(key, body.clone());
                    return Ok(body);
                },
                Err(e) => {
                    tracing::warn!(
                        "Statistics query failed against {} (attempt {}/{}): {}",
                        endpoint.url,
                        attempt,
                        attempts,
                        e
                    );
                    last_error = e;
                    if attempt < attempts {
                        // linear backoff
                        tokio::time::sleep(self.options.retry_delay * attempt).await;
                    }
                },
            }
        }
        Err(format!("query failed after {} attempts: {}", attempts, last_error))
    }

    async fn execute_once(&self, endpoint: &Endpoint, query: &str) -> Result<Value, String> {
        let request = self
            .http_client
            .post(&endpoint.url)
            .header("Content-Type", "application/sparql-query")
            .header("Accept", "application/sparql-results+json")
            .header("User-Agent", &self.options.user_agent)
            .timeout(self.options.query_timeout)
            .body(query.to_string());

        let request = match &endpoint.auth {
            Some(EndpointAuth::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            },
            Some(EndpointAuth::Bearer { token }) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status.as_u16()));
        }
        response.json::<Value>().await.map_err(|e| e.to_string())
    }
}

struct CollectionRun {
    cache: HashMap<u64, Value>,
}

impl CollectionRun {
    fn new() -> Self {
        Self { cache: HashMap::new() }
    }

    fn cache_key(&self, endpoint_url: &str, query: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        endpoint_url.hash(&mut hasher);
        query.hash(&mut hasher);
        hasher.finish()
    }
}

// ========================================
// Result helpers
// ========================================

fn bindings(body: &Value) -> Vec<&serde_json::Map<String, Value>> {
    body.get("results")
        .and_then(|r| r.get("bindings"))
        .and_then(Value::as_array)
        .map(|rows| rows.iter().filter_map(Value::as_object).collect())
        .unwrap_or_default()
}

fn first_binding_value(body: &Value, var: &str) -> Option<String> {
    bindings(body)
        .first()
        .and_then(|row| row.get(var))
        .and_then(|t| t.get("value"))
        .and_then(Value::as_str)
        .map(String::from)
}

fn histogram_from(body: &Value, var: &str) -> BTreeMap<String, u64> {
    let mut histogram = BTreeMap::new();
    for row in bindings(body) {
        let key = row.get(var).and_then(|t| t.get("value")).and_then(Value::as_str);
        let count = row
            .get("count")
            .and_then(|t| t.get("value"))
            .and_then(Value::as_str)
            .and_then(|v| v.parse::<u64>().ok());
        if let (Some(key), Some(count)) = (key, count) {
            if !key.is_empty() {
                histogram.insert(key.to_string(), count);
            }
        }
    }
    histogram
}

/// Aggregate top-property counts by namespace
fn namespace_usage(top_properties: &[(String, u64)]) -> BTreeMap<String, u64> {
    let mut usage: BTreeMap<String, u64> = BTreeMap::new();
    for (iri, count) in top_properties {
        if let Some(ns) = namespace_of(iri) {
            *usage.entry(ns.to_string()).or_insert(0) += count;
        }
    }
    usage
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_splits_at_last_hash_then_slash() {
        assert_eq!(
            namespace_of("http://www.w3.org/2000/01/rdf-schema#label"),
            Some("http://www.w3.org/2000/01/rdf-schema#")
        );
        assert_eq!(
            namespace_of("http://xmlns.com/foaf/0.1/name"),
            Some("http://xmlns.com/foaf/0.1/")
        );
        // a hash wins even when a slash follows it
        assert_eq!(
            namespace_of("http://ex.org/hash#frag/x"),
            Some("http://ex.org/hash#")
        );
        assert_eq!(namespace_of("urn:isbn:0451450523"), None);
    }

    #[test]
    fn namespace_usage_aggregates_counts() {
        let props = vec![
            ("http://xmlns.com/foaf/0.1/name".to_string(), 100),
            ("http://xmlns.com/foaf/0.1/knows".to_string(), 50),
            ("http://www.w3.org/2000/01/rdf-schema#label".to_string(), 30),
        ];
        let usage = namespace_usage(&props);
        assert_eq!(usage.get("http://xmlns.com/foaf/0.1/"), Some(&150));
        assert_eq!(usage.get("http://www.w3.org/2000/01/rdf-schema#"), Some(&30));
    }

    #[test]
    fn parses_count_binding() {
        let body: Value = serde_json::from_str(
            r#"{ "head": {"vars": ["count"]},
                 "results": { "bindings": [
                   { "count": { "type": "typed-literal", "value": "42" } } ] } }"#,
        )
        .expect("json");
        assert_eq!(first_binding_value(&body, "count").as_deref(), Some("42"));
    }

    #[test]
    fn summary_mentions_top_entries() {
        let mut stats = DatasetStatistics::default();
        stats.total_triples = Some(1000);
        stats.top_classes.push(("http://ex.org/Protein".to_string(), 10));
        let summary = stats.summary();
        assert!(summary.contains("triples: 1000"));
        assert!(summary.contains("http://ex.org/Protein"));
    }
}
