//! Candidate entities proposed by backends.

use serde::{Deserialize, Serialize};

use crate::query::TypeRef;

/// Score reserved for an exact match.
pub const EXACT_MATCH_SCORE: f64 = 1.0;

/// One proposed matching entity.
///
/// Backends fill in `id`, `label`, `types` and a raw `score`; the match
/// policy then clamps the score and decides `is_match`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Entity id in the backend.
    pub id: String,
    /// Display name.
    #[serde(rename = "name")]
    pub label: String,
    /// Types the entity carries.
    #[serde(rename = "type", default)]
    pub types: Vec<TypeRef>,
    /// Confidence in `[0.0, 1.0]` once ranked.
    pub score: f64,
    /// Set on at most one candidate per list.
    #[serde(rename = "match", default)]
    pub is_match: bool,
}

impl Candidate {
    /// A new unmatched candidate.
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            types: Vec::new(),
            score,
            is_match: false,
        }
    }

    /// Adds a type.
    #[must_use]
    pub fn with_type(mut self, ty: TypeRef) -> Self {
        self.types.push(ty);
        self
    }

    /// Returns true if this candidate carries a type with the given id.
    #[must_use]
    pub fn has_type(&self, type_id: &str) -> bool {
        self.types.iter().any(|t| t.id == type_id)
    }
}
