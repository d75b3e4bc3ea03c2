//! Property filter rules for constrained queries and extension cells.
//!
//! These rules belong to the backends, not to the dispatcher: a
//! [`PropertyFilter`] travels inside each
//! [`PropertyConstraint`](crate::query::PropertyConstraint) and adapters call
//! [`PropertyFilter::evaluate`] when they score property agreement.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::extend::Cell;
use crate::similarity::{normalize_label, JaroWinkler, SimilarityScorer};

/// How an expected value is compared with the entity's actual values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterType {
    /// Normalized string equality.
    #[default]
    ExactMatch,
    /// Label similarity compared against a threshold.
    Similarity,
}

/// Comparison applied between a similarity and the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Operator {
    /// Similarity above the threshold.
    #[serde(rename = ">")]
    Gt,
    /// Similarity equal to the threshold.
    #[default]
    #[serde(rename = "=")]
    Eq,
    /// Similarity below the threshold.
    #[serde(rename = "<")]
    Lt,
}

impl Operator {
    fn holds(self, similarity: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => similarity > threshold,
            Self::Eq => (similarity - threshold).abs() < f64::EPSILON,
            Self::Lt => similarity < threshold,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gt => write!(f, ">"),
            Self::Eq => write!(f, "="),
            Self::Lt => write!(f, "<"),
        }
    }
}

/// What happens when the entity has no value for the property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Restrict {
    /// Missing property excludes the constraint from scoring.
    Soft,
    /// Missing property scores 0.
    #[default]
    Hard,
}

/// Filter options attached to one property constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PropertyFilter {
    /// Exact or similarity comparison.
    pub filter_type: FilterType,
    /// How a similarity is compared with `threshold`.
    pub operator: Operator,
    /// Similarity threshold in `[0.0, 1.0]`.
    pub threshold: f64,
    /// What a missing property means.
    pub restrict: Restrict,
}

impl Default for PropertyFilter {
    fn default() -> Self {
        Self {
            filter_type: FilterType::ExactMatch,
            operator: Operator::Eq,
            threshold: 1.0,
            restrict: Restrict::Hard,
        }
    }
}

impl PropertyFilter {
    /// A similarity filter with the given operator and threshold.
    #[must_use]
    pub fn similarity(operator: Operator, threshold: f64) -> Self {
        Self {
            filter_type: FilterType::Similarity,
            operator,
            threshold,
            ..Self::default()
        }
    }

    /// Returns a copy with the given restrict mode.
    #[must_use]
    pub fn with_restrict(mut self, restrict: Restrict) -> Self {
        self.restrict = restrict;
        self
    }

    /// Scores how well `actual` satisfies `expected`.
    ///
    /// Returns `None` when the property is missing and the filter is soft,
    /// meaning the constraint should not count at all.
    #[must_use]
    pub fn evaluate(&self, expected: &str, actual: &[Cell]) -> Option<f64> {
        if actual.is_empty() {
            return match self.restrict {
                Restrict::Soft => None,
                Restrict::Hard => Some(0.0),
            };
        }

        let expected = normalize_label(expected);
        match self.filter_type {
            FilterType::ExactMatch => {
                let hit = actual
                    .iter()
                    .any(|cell| cell.comparable_forms().iter().any(|v| normalize_label(v) == expected));
                Some(if hit { 1.0 } else { 0.0 })
            }
            FilterType::Similarity => {
                let scorer = JaroWinkler::default();
                let best = actual
                    .iter()
                    .flat_map(Cell::comparable_forms)
                    .map(|v| scorer.score(&expected, &normalize_label(&v)))
                    .fold(0.0_f64, f64::max);
                if self.operator.holds(best, self.threshold) {
                    Some(best)
                } else {
                    Some(0.0)
                }
            }
        }
    }
}
