//! The confidence gate: four independent dimensions, all of which must pass
//! before an action may run unsupervised.

use chrono::{DateTime, Utc};
use keel_core::{Clock, SanitizedSignal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::boundary::BoundaryClassifier;
use crate::precedent::Precedent;

/// Distinct sources at which source agreement saturates.
const FULL_SOURCE_AGREEMENT: f64 = 2.0;
/// Executed precedents at which precedent match saturates.
const FULL_PRECEDENT_MATCH: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    SourceAgreement,
    BoundaryCompliance,
    SchemaValidity,
    PrecedentMatch,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Self::SourceAgreement,
        Self::BoundaryCompliance,
        Self::SchemaValidity,
        Self::PrecedentMatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceAgreement => "source_agreement",
            Self::BoundaryCompliance => "boundary_compliance",
            Self::SchemaValidity => "schema_validity",
            Self::PrecedentMatch => "precedent_match",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub pass: bool,
    /// In `0.0..=1.0`.
    pub score: f64,
    pub evidence: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub source_agreement: DimensionScore,
    pub boundary_compliance: DimensionScore,
    pub schema_validity: DimensionScore,
    pub precedent_match: DimensionScore,
}

impl Dimensions {
    pub fn get(&self, dimension: Dimension) -> &DimensionScore {
        match dimension {
            Dimension::SourceAgreement => &self.source_agreement,
            Dimension::BoundaryCompliance => &self.boundary_compliance,
            Dimension::SchemaValidity => &self.schema_validity,
            Dimension::PrecedentMatch => &self.precedent_match,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Dimension, &DimensionScore)> + '_ {
        Dimension::ALL.into_iter().map(move |d| (d, self.get(d)))
    }
}

/// One evaluation of one proposed action. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    /// True iff every dimension passes. The only gate for unsupervised execution.
    pub pass: bool,
    pub dimensions: Dimensions,
    pub scored_at: DateTime<Utc>,
}

impl ConfidenceScore {
    /// Mean of the four dimension scores. Display only; never gates anything.
    pub fn overall_score(&self) -> f64 {
        self.dimensions.iter().map(|(_, d)| d.score).sum::<f64>() / Dimension::ALL.len() as f64
    }

    /// One line per failing dimension, with that dimension's evidence.
    pub fn blocking_reasons(&self) -> Vec<String> {
        self.dimensions
            .iter()
            .filter(|(_, d)| !d.pass)
            .map(|(dim, d)| format!("{dim}: {}", d.evidence))
            .collect()
    }
}

/// Computes [`ConfidenceScore`]s. Pure apart from the timestamp.
#[derive(Clone)]
pub struct ConfidenceScorer {
    classifier: BoundaryClassifier,
    clock: Arc<dyn Clock>,
}

impl ConfidenceScorer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            classifier: BoundaryClassifier,
            clock,
        }
    }

    /// Score a proposed action. `action_type` is the raw identifier; an unknown one
    /// fails boundary compliance rather than erroring.
    pub fn score(
        &self,
        action_type: &str,
        signals: &[SanitizedSignal],
        precedents: &[Precedent],
        schema_valid: bool,
    ) -> ConfidenceScore {
        let classified = self.classifier.classify_raw(action_type);

        let sources: BTreeSet<_> = signals.iter().map(|s| s.source).collect();
        let source_agreement = DimensionScore {
            pass: !sources.is_empty(),
            score: (sources.len() as f64 / FULL_SOURCE_AGREEMENT).min(1.0),
            evidence: if sources.is_empty() {
                "no supporting signals".to_string()
            } else {
                let names: Vec<&str> = sources.iter().map(|s| s.as_str()).collect();
                format!("{} distinct source(s): {}", sources.len(), names.join(", "))
            },
        };

        let boundary_compliance = match classified {
            Some((_, boundary)) => DimensionScore {
                pass: boundary.is_compliant(),
                score: boundary.compliance_score(),
                evidence: format!("action type '{action_type}' is {boundary}"),
            },
            None => DimensionScore {
                pass: false,
                score: 0.0,
                evidence: format!("unknown action type '{action_type}'"),
            },
        };

        let schema_validity = DimensionScore {
            pass: schema_valid,
            score: if schema_valid { 1.0 } else { 0.0 },
            evidence: if schema_valid {
                "payload conforms to its schema".to_string()
            } else {
                "payload failed schema validation".to_string()
            },
        };

        let executed = match classified {
            Some((kind, _)) => precedents
                .iter()
                .filter(|p| p.action_type == kind && p.is_executed())
                .count(),
            None => 0,
        };
        let precedent_match = DimensionScore {
            pass: executed >= 1,
            score: (executed as f64 / FULL_PRECEDENT_MATCH).min(1.0),
            evidence: format!("{executed} executed precedent(s) of this type"),
        };

        let dimensions = Dimensions {
            source_agreement,
            boundary_compliance,
            schema_validity,
            precedent_match,
        };
        let pass = dimensions.iter().all(|(_, d)| d.pass);
        debug!(
            action_type,
            pass,
            sources = sources.len(),
            executed_precedents = executed,
            schema_valid,
            "confidence scored"
        );

        ConfidenceScore {
            pass,
            dimensions,
            scored_at: self.clock.now(),
        }
    }
}
