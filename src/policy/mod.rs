//! Ranking and best-match decision.
//!
//! Policies are pure: given the same query and candidates they always produce
//! the same ranked list, so cached results are reproducible.

pub mod property;

use std::cmp::Ordering;

use crate::candidate::{Candidate, EXACT_MATCH_SCORE};
use crate::config::MatchConfig;
use crate::query::Query;

pub use property::{FilterType, Operator, PropertyFilter, Restrict};

/// Turns a backend's raw candidates into the ranked list returned to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchPolicy {
    match_threshold: f64,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self::from_config(&MatchConfig::default())
    }
}

impl MatchPolicy {
    /// Policy with an explicit threshold, clamped to `[0.0, 1.0]`.
    #[must_use]
    pub fn new(match_threshold: f64) -> Self {
        Self {
            match_threshold: clamp_score(match_threshold),
        }
    }

    /// Policy configured from [`MatchConfig`].
    #[must_use]
    pub fn from_config(config: &MatchConfig) -> Self {
        Self::new(config.match_threshold)
    }

    /// Score a lone candidate must exceed to be a match.
    #[must_use]
    pub const fn match_threshold(&self) -> f64 {
        self.match_threshold
    }

    /// Filters, ranks, marks and truncates `candidates` for `query`.
    ///
    /// 1. With a requested type and `should`/`must` strictness, candidates
    ///    lacking that type are dropped.
    /// 2. Stable sort by descending score, so ties keep backend order. NaN
    ///    ranks as `0.0`.
    /// 3. The top candidate is a match if it scores exactly `1.0`, or if it is
    ///    the only candidate and scores above the threshold. No other
    ///    candidate is ever a match. Scores outside `[0.0, 1.0]` are clamped
    ///    afterwards, so an out-of-range score never passes as exact.
    /// 4. The list is cut to the query limit (zero means unlimited).
    #[must_use]
    pub fn apply(&self, query: &Query, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
        if let Some(ty) = query.requested_type() {
            if query.type_strictness().filters() {
                candidates.retain(|c| c.has_type(&ty.id));
            }
        }

        for c in &mut candidates {
            if c.score.is_nan() {
                c.score = 0.0;
            }
            c.is_match = false;
        }

        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        let single = candidates.len() == 1;
        if let Some(top) = candidates.first_mut() {
            #[allow(clippy::float_cmp)]
            let exact = top.score == EXACT_MATCH_SCORE;
            top.is_match = exact || (single && clamp_score(top.score) > self.match_threshold);
        }

        for c in &mut candidates {
            c.score = clamp_score(c.score);
        }

        if query.limit() > 0 {
            candidates.truncate(query.limit());
        }
        candidates
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}
