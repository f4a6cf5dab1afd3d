//! Inferred schema models: per-class shapes, constraints, and quality metrics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cardinality of a predicate on instances of a class
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    ExactlyOne,
    ZeroOrOne,
    OneOrMore,
    ZeroOrMore,
}

impl Cardinality {
    /// ShEx cardinality suffix
    pub fn shex_suffix(&self) -> &'static str {
        match self {
            Self::ExactlyOne => "",
            Self::ZeroOrOne => "?",
            Self::OneOrMore => "+",
            Self::ZeroOrMore => "*",
        }
    }
}

/// Node kind when all observed objects agree
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Iri,
    Literal,
    BlankNode,
}

/// Confidence grade for an inferred rule
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintConfidence {
    Low,
    Medium,
    High,
}

impl ConstraintConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Kind of an inferred value constraint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintType {
    Cardinality,
    Datatype,
    MinInclusive,
    MaxInclusive,
    Pattern,
    Closed,
}

/// A single inferred constraint with its confidence and rationale
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferredConstraint {
    pub constraint_type: ConstraintType,
    pub value: String,
    pub confidence: ConstraintConfidence,
    pub explanation: String,
}

/// One predicate's inferred shape within a class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyShape {
    pub predicate: String,
    pub cardinality: Cardinality,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_kind: Option<NodeKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<InferredConstraint>,
    pub confidence: ConstraintConfidence,
    /// Fraction of class instances observed with this predicate
    pub coverage: f64,
    pub sample_size: usize,
}

/// Aggregate quality of one inference run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub total_instances: usize,
    /// Mean per-property coverage across all shapes
    pub coverage: f64,
    /// Fraction of classes with at least one non-type property
    pub completeness: f64,
    /// Mean numeric confidence (high=1.0, medium=0.6, low=0.3)
    pub constraint_confidence: f64,
    /// Fraction of properties whose observed objects agree on node kind
    pub consistency: f64,
}

/// Full inferred schema: class IRI to property shapes, plus run quality
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferredSchema {
    pub classes: BTreeMap<String, Vec<PropertyShape>>,
    pub quality: QualityMetrics,
}

impl InferredSchema {
    /// Render as a ShEx-like shape document.
    ///
    /// The structured schema stays the source of truth; this rendering is
    /// for display and prompt grounding.
    pub fn to_shex(&self) -> String {
        let mut out = String::new();
        for (class_iri, shapes) in &self.classes {
            let shape_name = shape_name_for(class_iri);
            out.push_str(&format!("<{}> {{\n", shape_name));
            out.push_str(&format!(
                "  a [<{}>] ;\n",
                class_iri
            ));
            for (i, shape) in shapes.iter().enumerate() {
                let value = match (&shape.datatype, shape.node_kind) {
                    (Some(dt), _) => compact_xsd(dt),
                    (None, Some(NodeKind::Iri)) => "IRI".to_string(),
                    (None, Some(NodeKind::Literal)) => "Literal".to_string(),
                    (None, Some(NodeKind::BlankNode)) => "BNode".to_string(),
                    (None, None) => ".".to_string(),
                };
                let terminator = if i + 1 == shapes.len() { "" } else { " ;" };
                out.push_str(&format!(
                    "  <{}> {}{}{}  # confidence: {}\n",
                    shape.predicate,
                    value,
                    shape.cardinality.shex_suffix(),
                    terminator,
                    shape.confidence.as_str()
                ));
            }
            out.push_str("}\n\n");
        }
        out
    }
}

/// Derive `<LocalNameShape>` from a class IRI
fn shape_name_for(class_iri: &str) -> String {
    let local = class_iri
        .rsplit(['#', '/'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("Anon");
    format!("{}Shape", local)
}

fn compact_xsd(datatype: &str) -> String {
    match datatype.strip_prefix("http://www.w3.org/2001/XMLSchema#") {
        Some(local) => format!("xsd:{}", local),
        None => format!("<{}>", datatype),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_name_uses_local_name() {
        assert_eq!(shape_name_for("http://example.org/Protein"), "ProteinShape");
        assert_eq!(shape_name_for("http://example.org/ns#Gene"), "GeneShape");
    }

    #[test]
    fn shex_rendering_includes_cardinality_suffix() {
        let mut schema = InferredSchema::default();
        schema.classes.insert(
            "http://example.org/Protein".to_string(),
            vec![PropertyShape {
                predicate: "http://example.org/synonym".to_string(),
                cardinality: Cardinality::ZeroOrMore,
                datatype: Some("http://www.w3.org/2001/XMLSchema#string".to_string()),
                node_kind: Some(NodeKind::Literal),
                constraints: Vec::new(),
                confidence: ConstraintConfidence::Medium,
                coverage: 0.4,
                sample_size: 40,
            }],
        );
        let shex = schema.to_shex();
        assert!(shex.contains("<ProteinShape> {"));
        assert!(shex.contains("xsd:string*"));
        assert!(shex.contains("# confidence: medium"));
    }
}
