//! Schema inference from observed triples
//!
//! Consumes a stream of `(subject, predicate, object, subject_type)`
//! observations and derives per-class property shapes: cardinality,
//! datatype or node kind, value constraints, and a confidence grade per
//! rule. The structured `InferredSchema` is the output; ShEx rendering
//! lives on the model.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::models::schema::{
    Cardinality, ConstraintConfidence, ConstraintType, InferredConstraint, InferredSchema,
    NodeKind, PropertyShape, QualityMetrics,
};

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
const XSD_DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
const XSD_DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";
const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
const XSD_DATE: &str = "http://www.w3.org/2001/XMLSchema#date";
const XSD_DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";

// ============================================================================
// Observed Terms
// ============================================================================

/// Object position of an observed triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedTerm {
    Iri(String),
    Literal { value: String, datatype: Option<String> },
    Blank(String),
}

impl ObservedTerm {
    pub fn iri(value: impl Into<String>) -> Self {
        Self::Iri(value.into())
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal { value: value.into(), datatype: None }
    }

    pub fn typed_literal(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self::Literal { value: value.into(), datatype: Some(datatype.into()) }
    }
}

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone)]
pub struct InferenceOptions {
    /// Coverage at or above which a property counts as required
    pub cardinality_threshold: f64,
    /// Coverage below which a single-valued property is ZeroOrOne
    pub optional_threshold: f64,
    /// Shapes below this numeric confidence are dropped from the schema
    pub min_confidence: f64,
    /// Retained sample values per property
    pub max_sample_values: usize,
    /// Tracked subjects per property and instances per class
    pub max_tracked_subjects: usize,
    /// Minimum numeric samples before emitting a bounds constraint
    pub bound_sample_min: usize,
    /// Fraction of literals that must match a known pattern
    pub pattern_match_threshold: f64,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            cardinality_threshold: 0.9,
            optional_threshold: 0.85,
            min_confidence: 0.0,
            max_sample_values: 10,
            max_tracked_subjects: 1000,
            bound_sample_min: 5,
            pattern_match_threshold: 0.8,
        }
    }
}

// ============================================================================
// Accumulated Statistics
// ============================================================================

/// Per-predicate observations across the whole stream
#[derive(Debug, Clone, Default, Serialize)]
pub struct PropertyStats {
    pub usage_count: usize,
    /// Values seen per subject, bounded by `max_tracked_subjects`
    pub values_per_subject: HashMap<String, usize>,
    /// Bounded sample of literal lexical forms
    pub sample_values: Vec<String>,
    pub datatype_counts: BTreeMap<String, usize>,
    pub iri_objects: usize,
    pub literal_objects: usize,
    pub blank_objects: usize,
    pub numeric_count: usize,
    pub numeric_min: Option<f64>,
    pub numeric_max: Option<f64>,
}

/// Per-class observations
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassStats {
    pub instance_count: usize,
    /// Bounded instance set used for coverage computation
    pub instances: HashSet<String>,
    /// Predicate to usage count on instances of this class
    pub property_usage: BTreeMap<String, usize>,
}

/// Full output of one inference run
#[derive(Debug, Clone)]
pub struct InferenceResult {
    pub schema: InferredSchema,
    pub property_stats: BTreeMap<String, PropertyStats>,
    pub class_stats: BTreeMap<String, ClassStats>,
}

// ============================================================================
// Well-known String Patterns
// ============================================================================

static STRING_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "email",
            Regex::new(r"^[\w.+-]+@[\w-]+\.[\w.-]+$").expect("email regex"),
        ),
        (
            "uuid",
            Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
                .expect("uuid regex"),
        ),
        (
            "iso-date",
            Regex::new(r"^\d{4}-\d{2}-\d{2}(T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})?)?$")
                .expect("date regex"),
        ),
        ("curie", Regex::new(r"^[A-Za-z][\w-]*:[\w][\w.-]*$").expect("curie regex")),
    ]
});

static INTEGER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]?\d+$").expect("int regex"));
static DECIMAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?\d*\.\d+$").expect("decimal regex"));

// ============================================================================
// Inferencer
// ============================================================================

#[derive(Debug, Default)]
pub struct SchemaInferencer {
    options: InferenceOptions,
    property_stats: BTreeMap<String, PropertyStats>,
    class_stats: BTreeMap<String, ClassStats>,
    /// Subject to predicates observed, for per-class property attribution
    subject_properties: HashMap<String, HashSet<String>>,
}

impl SchemaInferencer {
    pub fn new(options: InferenceOptions) -> Self {
        Self {
            options,
            property_stats: BTreeMap::new(),
            class_stats: BTreeMap::new(),
            subject_properties: HashMap::new(),
        }
    }

    pub fn property_stats(&self) -> &BTreeMap<String, PropertyStats> {
        &self.property_stats
    }

    pub fn class_stats(&self) -> &BTreeMap<String, ClassStats> {
        &self.class_stats
    }

    /// Observe one triple.
    ///
    /// `rdf:type` assertions (full IRI or the `a` shorthand) register class
    /// membership instead of a property observation; `subject_type`, when
    /// given, registers membership for ordinary triples too.
    pub fn add_triple(
        &mut self,
        subject: &str,
        predicate: &str,
        object: &ObservedTerm,
        subject_type: Option<&str>,
    ) {
        if is_type_predicate(predicate) {
            if let ObservedTerm::Iri(class_iri) = object {
                self.register_instance(class_iri.clone(), subject);
            }
            return;
        }

        if let Some(class_iri) = subject_type {
            self.register_instance(class_iri.to_string(), subject);
        }

        let max_tracked = self.options.max_tracked_subjects;
        let max_samples = self.options.max_sample_values;
        let stats = self.property_stats.entry(predicate.to_string()).or_default();
        stats.usage_count += 1;

        if stats.values_per_subject.len() < max_tracked
            || stats.values_per_subject.contains_key(subject)
        {
            *stats.values_per_subject.entry(subject.to_string()).or_insert(0) += 1;
        }

        match object {
            ObservedTerm::Iri(_) => stats.iri_objects += 1,
            ObservedTerm::Blank(_) => stats.blank_objects += 1,
            ObservedTerm::Literal { value, datatype } => {
                stats.literal_objects += 1;
                if stats.sample_values.len() < max_samples {
                    stats.sample_values.push(value.clone());
                }
                let datatype = datatype
                    .clone()
                    .unwrap_or_else(|| infer_literal_datatype(value).to_string());
                *stats.datatype_counts.entry(datatype).or_insert(0) += 1;

                if let Ok(number) = value.parse::<f64>() {
                    stats.numeric_count += 1;
                    stats.numeric_min =
                        Some(stats.numeric_min.map_or(number, |m| m.min(number)));
                    stats.numeric_max =
                        Some(stats.numeric_max.map_or(number, |m| m.max(number)));
                }
            },
        }

        self.subject_properties
            .entry(subject.to_string())
            .or_default()
            .insert(predicate.to_string());
    }

    fn register_instance(&mut self, class_iri: String, subject: &str) {
        let max_tracked = self.options.max_tracked_subjects;
        let stats = self.class_stats.entry(class_iri).or_default();
        if stats.instances.contains(subject) {
            return;
        }
        stats.instance_count += 1;
        if stats.instances.len() < max_tracked {
            stats.instances.insert(subject.to_string());
        }
    }

    /// Derive the schema from everything observed so far
    pub fn generate(&mut self) -> InferenceResult {
        self.attribute_properties_to_classes();

        let mut schema = InferredSchema::default();
        for (class_iri, class_stats) in &self.class_stats {
            let shapes = self.shapes_for_class(class_stats);
            if !shapes.is_empty() || class_stats.instance_count > 0 {
                schema.classes.insert(class_iri.clone(), shapes);
            }
        }

        schema.quality = self.quality_metrics(&schema);

        tracing::debug!(
            "Inferred schema: {} classes, {} properties observed",
            schema.classes.len(),
            self.property_stats.len()
        );

        InferenceResult {
            schema,
            property_stats: self.property_stats.clone(),
            class_stats: self.class_stats.clone(),
        }
    }

    fn attribute_properties_to_classes(&mut self) {
        for class_stats in self.class_stats.values_mut() {
            class_stats.property_usage.clear();
            for instance in &class_stats.instances {
                if let Some(predicates) = self.subject_properties.get(instance) {
                    for predicate in predicates {
                        *class_stats.property_usage.entry(predicate.clone()).or_insert(0) += 1;
                    }
                }
            }
        }
    }

    fn shapes_for_class(&self, class_stats: &ClassStats) -> Vec<PropertyShape> {
        let instance_count = class_stats.instances.len();
        if instance_count == 0 {
            return Vec::new();
        }

        let mut shapes = Vec::new();
        for (predicate, with_property) in &class_stats.property_usage {
            let Some(prop_stats) = self.property_stats.get(predicate) else {
                continue;
            };

            let coverage = *with_property as f64 / instance_count as f64;
            let max_per_subject = class_stats
                .instances
                .iter()
                .filter_map(|s| prop_stats.values_per_subject.get(s))
                .copied()
                .max()
                .unwrap_or(1);

            let cardinality = self.cardinality_for(coverage, max_per_subject);
            let sample_size = *with_property;
            let confidence = self.confidence_for(coverage, sample_size);

            if numeric_confidence(confidence) < self.options.min_confidence {
                continue;
            }

            let node_kind = node_kind_of(prop_stats);
            let datatype = if node_kind == Some(NodeKind::Literal) {
                Some(self.datatype_for(prop_stats))
            } else {
                None
            };

            let mut constraints = Vec::new();
            self.numeric_bounds(prop_stats, &mut constraints);
            self.string_pattern(prop_stats, &mut constraints);

            shapes.push(PropertyShape {
                predicate: predicate.clone(),
                cardinality,
                datatype,
                node_kind,
                constraints,
                confidence,
                coverage,
                sample_size,
            });
        }

        shapes.sort_by(|a, b| a.predicate.cmp(&b.predicate));
        shapes
    }

    fn cardinality_for(&self, coverage: f64, max_per_subject: usize) -> Cardinality {
        if coverage >= self.options.cardinality_threshold {
            if max_per_subject == 1 {
                Cardinality::ExactlyOne
            } else {
                Cardinality::OneOrMore
            }
        } else if coverage < self.options.optional_threshold && max_per_subject == 1 {
            Cardinality::ZeroOrOne
        } else {
            Cardinality::ZeroOrMore
        }
    }

    /// High requires near-total coverage on a solid sample. Optional
    /// properties can never reach High (their coverage is below the
    /// cardinality threshold by construction) but a decent sample still
    /// earns Medium.
    fn confidence_for(&self, coverage: f64, sample_size: usize) -> ConstraintConfidence {
        if coverage >= 0.95 && sample_size >= 20 {
            ConstraintConfidence::High
        } else if sample_size >= 10 {
            ConstraintConfidence::Medium
        } else {
            ConstraintConfidence::Low
        }
    }

    /// Single observed datatype wins; mixed numerics generalize to decimal,
    /// anything else to string.
    fn datatype_for(&self, stats: &PropertyStats) -> String {
        let mut datatypes: Vec<&str> = stats.datatype_counts.keys().map(String::as_str).collect();
        datatypes.dedup();
        match datatypes.as_slice() {
            [] => XSD_STRING.to_string(),
            [only] => (*only).to_string(),
            _ => {
                let all_numeric = datatypes
                    .iter()
                    .all(|dt| matches!(*dt, XSD_INTEGER | XSD_DECIMAL | XSD_DOUBLE));
                if all_numeric {
                    XSD_DECIMAL.to_string()
                } else {
                    XSD_STRING.to_string()
                }
            },
        }
    }

    fn numeric_bounds(&self, stats: &PropertyStats, constraints: &mut Vec<InferredConstraint>) {
        if stats.numeric_count < self.options.bound_sample_min {
            return;
        }
        if let Some(min) = stats.numeric_min
            && min >= 0.0
        {
            constraints.push(InferredConstraint {
                constraint_type: ConstraintType::MinInclusive,
                value: "0".to_string(),
                confidence: ConstraintConfidence::High,
                explanation: format!(
                    "All {} observed numeric values are non-negative",
                    stats.numeric_count
                ),
            });
        }
    }

    fn string_pattern(&self, stats: &PropertyStats, constraints: &mut Vec<InferredConstraint>) {
        if stats.sample_values.is_empty() {
            return;
        }
        for (name, regex) in STRING_PATTERNS.iter() {
            let matched = stats
                .sample_values
                .iter()
                .filter(|v| regex.is_match(v))
                .count();
            let fraction = matched as f64 / stats.sample_values.len() as f64;
            if fraction >= self.options.pattern_match_threshold {
                constraints.push(InferredConstraint {
                    constraint_type: ConstraintType::Pattern,
                    value: (*name).to_string(),
                    confidence: ConstraintConfidence::Medium,
                    explanation: format!(
                        "{:.0}% of sampled values match the {} pattern",
                        fraction * 100.0,
                        name
                    ),
                });
                return;
            }
        }
    }

    fn quality_metrics(&self, schema: &InferredSchema) -> QualityMetrics {
        let total_instances: usize =
            self.class_stats.values().map(|c| c.instance_count).sum();

        let all_shapes: Vec<&PropertyShape> =
            schema.classes.values().flatten().collect();

        let coverage = if all_shapes.is_empty() {
            0.0
        } else {
            all_shapes.iter().map(|s| s.coverage).sum::<f64>() / all_shapes.len() as f64
        };

        let classes_with_properties = schema
            .classes
            .values()
            .filter(|shapes| !shapes.is_empty())
            .count();
        let completeness = if schema.classes.is_empty() {
            0.0
        } else {
            classes_with_properties as f64 / schema.classes.len() as f64
        };

        let constraint_confidence = if all_shapes.is_empty() {
            0.0
        } else {
            all_shapes
                .iter()
                .map(|s| numeric_confidence(s.confidence))
                .sum::<f64>()
                / all_shapes.len() as f64
        };

        let consistency = if all_shapes.is_empty() {
            0.0
        } else {
            all_shapes.iter().filter(|s| s.node_kind.is_some()).count() as f64
                / all_shapes.len() as f64
        };

        QualityMetrics {
            total_instances,
            coverage,
            completeness,
            constraint_confidence,
            consistency,
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn is_type_predicate(predicate: &str) -> bool {
    predicate == RDF_TYPE || predicate == "a" || predicate == "rdf:type"
}

fn node_kind_of(stats: &PropertyStats) -> Option<NodeKind> {
    let kinds = [
        (stats.iri_objects, NodeKind::Iri),
        (stats.literal_objects, NodeKind::Literal),
        (stats.blank_objects, NodeKind::BlankNode),
    ];
    let mut present = kinds.iter().filter(|(count, _)| *count > 0);
    match (present.next(), present.next()) {
        (Some((_, kind)), None) => Some(*kind),
        _ => None,
    }
}

fn numeric_confidence(confidence: ConstraintConfidence) -> f64 {
    match confidence {
        ConstraintConfidence::High => 1.0,
        ConstraintConfidence::Medium => 0.6,
        ConstraintConfidence::Low => 0.3,
    }
}

/// Heuristic datatype for an untyped literal
fn infer_literal_datatype(value: &str) -> &'static str {
    if INTEGER_RE.is_match(value) {
        XSD_INTEGER
    } else if DECIMAL_RE.is_match(value) {
        XSD_DECIMAL
    } else if value == "true" || value == "false" {
        XSD_BOOLEAN
    } else if STRING_PATTERNS[2].1.is_match(value) {
        if value.contains('T') { XSD_DATE_TIME } else { XSD_DATE }
    } else {
        XSD_STRING
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typed(value: &str) -> ObservedTerm {
        ObservedTerm::typed_literal(value, XSD_STRING)
    }

    #[test]
    fn protein_shape_matches_expected_cardinalities() {
        let mut inferencer = SchemaInferencer::new(InferenceOptions::default());
        let class_iri = "http://example.org/Protein";

        // 100 instances, each with exactly one name
        for i in 0..100 {
            let subject = format!("http://example.org/protein{}", i);
            inferencer.add_triple(
                &subject,
                RDF_TYPE,
                &ObservedTerm::iri(class_iri),
                None,
            );
            inferencer.add_triple(
                &subject,
                "http://example.org/name",
                &typed(&format!("Protein {}", i)),
                None,
            );
        }
        // 40 instances with one or more synonyms
        for i in 0..40 {
            let subject = format!("http://example.org/protein{}", i);
            inferencer.add_triple(&subject, "http://example.org/synonym", &typed("syn-a"), None);
            if i % 2 == 0 {
                inferencer.add_triple(
                    &subject,
                    "http://example.org/synonym",
                    &typed("syn-b"),
                    None,
                );
            }
        }

        let result = inferencer.generate();
        let shapes = result.schema.classes.get(class_iri).expect("protein shapes");

        let name = shapes
            .iter()
            .find(|s| s.predicate.ends_with("name"))
            .expect("name shape");
        assert_eq!(name.cardinality, Cardinality::ExactlyOne);
        assert_eq!(name.datatype.as_deref(), Some(XSD_STRING));
        assert_eq!(name.confidence, ConstraintConfidence::High);

        let synonym = shapes
            .iter()
            .find(|s| s.predicate.ends_with("synonym"))
            .expect("synonym shape");
        assert_eq!(synonym.cardinality, Cardinality::ZeroOrMore);
        assert_eq!(synonym.datatype.as_deref(), Some(XSD_STRING));
        assert_eq!(synonym.confidence, ConstraintConfidence::Medium);
    }

    #[test]
    fn one_or_more_when_required_and_repeated() {
        let mut inferencer = SchemaInferencer::new(InferenceOptions::default());
        for i in 0..20 {
            let subject = format!("http://ex.org/s{}", i);
            inferencer.add_triple(
                &subject,
                RDF_TYPE,
                &ObservedTerm::iri("http://ex.org/Thing"),
                None,
            );
            inferencer.add_triple(&subject, "http://ex.org/tag", &typed("x"), None);
            inferencer.add_triple(&subject, "http://ex.org/tag", &typed("y"), None);
        }

        let result = inferencer.generate();
        let shapes = result.schema.classes.get("http://ex.org/Thing").expect("shapes");
        let tag = shapes.iter().find(|s| s.predicate.ends_with("tag")).expect("tag");
        assert_eq!(tag.cardinality, Cardinality::OneOrMore);
    }

    #[test]
    fn zero_or_one_for_sparse_single_valued_property() {
        let mut inferencer = SchemaInferencer::new(InferenceOptions::default());
        for i in 0..10 {
            let subject = format!("http://ex.org/s{}", i);
            inferencer.add_triple(
                &subject,
                RDF_TYPE,
                &ObservedTerm::iri("http://ex.org/Thing"),
                None,
            );
            if i < 5 {
                inferencer.add_triple(&subject, "http://ex.org/note", &typed("n"), None);
            }
        }

        let result = inferencer.generate();
        let shapes = result.schema.classes.get("http://ex.org/Thing").expect("shapes");
        let note = shapes.iter().find(|s| s.predicate.ends_with("note")).expect("note");
        assert_eq!(note.cardinality, Cardinality::ZeroOrOne);
    }

    #[test]
    fn node_kind_mixed_objects_is_unset() {
        let mut inferencer = SchemaInferencer::new(InferenceOptions::default());
        for i in 0..10 {
            let subject = format!("http://ex.org/s{}", i);
            inferencer.add_triple(
                &subject,
                "http://ex.org/rel",
                &ObservedTerm::iri("http://ex.org/o"),
                Some("http://ex.org/Thing"),
            );
            inferencer.add_triple(&subject, "http://ex.org/rel", &typed("lit"), None);
        }

        let result = inferencer.generate();
        let shapes = result.schema.classes.get("http://ex.org/Thing").expect("shapes");
        let rel = shapes.iter().find(|s| s.predicate.ends_with("rel")).expect("rel");
        assert_eq!(rel.node_kind, None);
        assert_eq!(rel.datatype, None);
    }

    #[test]
    fn nonnegative_numerics_emit_min_inclusive_at_high_confidence() {
        let mut inferencer = SchemaInferencer::new(InferenceOptions::default());
        for i in 0..25 {
            let subject = format!("http://ex.org/s{}", i);
            inferencer.add_triple(
                &subject,
                "http://ex.org/count",
                &ObservedTerm::typed_literal(i.to_string(), XSD_INTEGER),
                Some("http://ex.org/Thing"),
            );
        }

        let result = inferencer.generate();
        let shapes = result.schema.classes.get("http://ex.org/Thing").expect("shapes");
        let count = shapes.iter().find(|s| s.predicate.ends_with("count")).expect("count");
        let bound = count
            .constraints
            .iter()
            .find(|c| c.constraint_type == ConstraintType::MinInclusive)
            .expect("min bound");
        assert_eq!(bound.value, "0");
        assert_eq!(bound.confidence, ConstraintConfidence::High);
    }

    #[test]
    fn uuid_pattern_detected_on_samples() {
        let mut inferencer = SchemaInferencer::new(InferenceOptions::default());
        for i in 0..12 {
            let subject = format!("http://ex.org/s{}", i);
            inferencer.add_triple(
                &subject,
                "http://ex.org/id",
                &typed(&format!("123e4567-e89b-12d3-a456-4266141740{:02}", i)),
                Some("http://ex.org/Thing"),
            );
        }

        let result = inferencer.generate();
        let shapes = result.schema.classes.get("http://ex.org/Thing").expect("shapes");
        let id = shapes.iter().find(|s| s.predicate.ends_with("id")).expect("id");
        assert!(id
            .constraints
            .iter()
            .any(|c| c.constraint_type == ConstraintType::Pattern && c.value == "uuid"));
    }

    #[test]
    fn untyped_literal_datatypes_are_inferred() {
        assert_eq!(infer_literal_datatype("42"), XSD_INTEGER);
        assert_eq!(infer_literal_datatype("4.2"), XSD_DECIMAL);
        assert_eq!(infer_literal_datatype("true"), XSD_BOOLEAN);
        assert_eq!(infer_literal_datatype("2024-05-01"), XSD_DATE);
        assert_eq!(infer_literal_datatype("2024-05-01T10:00:00Z"), XSD_DATE_TIME);
        assert_eq!(infer_literal_datatype("hello"), XSD_STRING);
    }

    #[test]
    fn quality_metrics_track_totals() {
        let mut inferencer = SchemaInferencer::new(InferenceOptions::default());
        for i in 0..30 {
            let subject = format!("http://ex.org/s{}", i);
            inferencer.add_triple(
                &subject,
                "http://ex.org/name",
                &typed("x"),
                Some("http://ex.org/Thing"),
            );
        }

        let result = inferencer.generate();
        let quality = &result.schema.quality;
        assert_eq!(quality.total_instances, 30);
        assert!(quality.coverage > 0.99);
        assert!(quality.completeness > 0.99);
        assert!(quality.consistency > 0.99);
    }
}
