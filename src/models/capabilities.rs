//! Capability and dataset-statistics records built by endpoint discovery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A SPARQL language feature detectable by probing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SparqlFeature {
    Optional,
    Union,
    Filter,
    Bind,
    GroupBy,
    Subquery,
    PropertyPaths,
    FullTextSearch,
    Federation,
}

impl SparqlFeature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Optional => "OPTIONAL",
            Self::Union => "UNION",
            Self::Filter => "FILTER",
            Self::Bind => "BIND",
            Self::GroupBy => "GROUP BY",
            Self::Subquery => "subquery",
            Self::PropertyPaths => "property paths",
            Self::FullTextSearch => "full-text search",
            Self::Federation => "SERVICE federation",
        }
    }
}

/// Named boolean vocabulary-usage patterns detected by ASK probes
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetectedPatterns {
    pub has_owl_ontology: bool,
    pub has_labels: bool,
    pub has_sameas: bool,
    pub has_skos: bool,
    pub has_dublin_core: bool,
}

/// Dataset-level statistics collected via COUNT/GROUP BY sampling
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetStatistics {
    pub total_triples: Option<u64>,
    pub distinct_subjects: Option<u64>,
    pub distinct_predicates: Option<u64>,
    pub distinct_objects: Option<u64>,
    pub distinct_classes: Option<u64>,
    /// Class IRI and instance count, descending by count
    pub top_classes: Vec<(String, u64)>,
    /// Predicate IRI and usage count, descending by count
    pub top_properties: Vec<(String, u64)>,
    /// Literal datatype IRI to observed count
    pub datatype_distribution: BTreeMap<String, u64>,
    /// Language tag to observed count
    pub language_distribution: BTreeMap<String, u64>,
    /// Namespace IRI to usage count across sampled predicates
    pub namespace_usage: BTreeMap<String, u64>,
    pub patterns: DetectedPatterns,
    pub collection_duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl DatasetStatistics {
    /// Human-readable multi-line summary
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str("Dataset statistics\n");
        if let Some(n) = self.total_triples {
            out.push_str(&format!("  triples: {}\n", n));
        }
        if let Some(n) = self.distinct_subjects {
            out.push_str(&format!("  distinct subjects: {}\n", n));
        }
        if let Some(n) = self.distinct_predicates {
            out.push_str(&format!("  distinct predicates: {}\n", n));
        }
        if let Some(n) = self.distinct_classes {
            out.push_str(&format!("  distinct classes: {}\n", n));
        }
        if !self.top_classes.is_empty() {
            out.push_str("  top classes:\n");
            for (iri, count) in self.top_classes.iter().take(5) {
                out.push_str(&format!("    {} ({})\n", iri, count));
            }
        }
        if !self.top_properties.is_empty() {
            out.push_str("  top properties:\n");
            for (iri, count) in self.top_properties.iter().take(5) {
                out.push_str(&format!("    {} ({})\n", iri, count));
            }
        }
        let p = &self.patterns;
        out.push_str(&format!(
            "  patterns: owl_ontology={} labels={} sameas={} skos={} dublin_core={}\n",
            p.has_owl_ontology, p.has_labels, p.has_sameas, p.has_skos, p.has_dublin_core
        ));
        for w in &self.warnings {
            out.push_str(&format!("  warning: {}\n", w));
        }
        out.push_str(&format!("  collected in {}ms", self.collection_duration_ms));
        out
    }
}

/// Everything discovery learned about one endpoint
///
/// Built by the capability detector; cacheable with a TTL. Probe timeouts
/// and failures are recorded rather than raised, so a `Capabilities` value
/// always exists for a reachable endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub endpoint_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sparql_version: Option<String>,
    pub features: BTreeSet<SparqlFeature>,
    /// MIME types the endpoint answered with during probing
    pub result_formats: Vec<String>,
    pub named_graphs: Vec<String>,
    /// Conventional or generated prefix to namespace IRI, stable iteration order
    pub namespaces: BTreeMap<String, String>,
    /// Built-in functions the endpoint accepted without a parse error
    pub supported_functions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<DatasetStatistics>,
    /// Probe names that hit their per-probe timeout
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timed_out_probes: Vec<String>,
    /// Probe names that failed outright (parse error, HTTP error, rate limit)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_probes: Vec<String>,
    pub detected_at: DateTime<Utc>,
    pub detection_duration_ms: u64,
}

impl Capabilities {
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            sparql_version: None,
            features: BTreeSet::new(),
            result_formats: Vec::new(),
            named_graphs: Vec::new(),
            namespaces: BTreeMap::new(),
            supported_functions: Vec::new(),
            statistics: None,
            timed_out_probes: Vec::new(),
            failed_probes: Vec::new(),
            detected_at: Utc::now(),
            detection_duration_ms: 0,
        }
    }

    pub fn supports(&self, feature: SparqlFeature) -> bool {
        self.features.contains(&feature)
    }

    /// Top predicates by namespace usage, for grounding repair prompts
    pub fn top_namespaces(&self, limit: usize) -> Vec<(&str, u64)> {
        let Some(stats) = &self.statistics else {
            return Vec::new();
        };
        let mut ranked: Vec<(&str, u64)> = stats
            .namespace_usage
            .iter()
            .map(|(ns, count)| (ns.as_str(), *count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(limit);
        ranked
    }
}
