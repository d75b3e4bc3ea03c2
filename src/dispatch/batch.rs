//! Batch input and output types.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::candidate::Candidate;
use crate::error::ValidationError;
use crate::query::Query;

/// Identifier attached to every batch for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub Uuid);

impl BatchId {
    /// A fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a batch inside the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum BatchPhase {
    Submitted,
    Dispatching,
    Collecting,
    Complete,
}

impl BatchPhase {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Dispatching => "dispatching",
            Self::Collecting => "collecting",
            Self::Complete => "complete",
        }
    }
}

/// Moves a batch forward through its phases, logging each transition.
#[derive(Debug)]
pub(crate) struct PhaseTracker {
    phase: BatchPhase,
}

impl PhaseTracker {
    pub(crate) const fn new() -> Self {
        Self {
            phase: BatchPhase::Submitted,
        }
    }

    pub(crate) fn advance(&mut self, next: BatchPhase) {
        debug_assert!(next > self.phase, "batch phases only move forward");
        tracing::trace!(from = self.phase.as_str(), to = next.as_str(), "batch_phase");
        self.phase = next;
    }

    #[cfg(test)]
    pub(crate) const fn phase(&self) -> BatchPhase {
        self.phase
    }
}

/// Keyed queries submitted together.
///
/// Keys are caller-chosen, non-empty and unique within the batch.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    entries: Vec<(String, Query)>,
    keys: HashSet<String>,
}

impl Batch {
    /// An empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a batch from `(key, query)` pairs.
    pub fn from_pairs<K: Into<String>>(
        pairs: impl IntoIterator<Item = (K, Query)>,
    ) -> Result<Self, ValidationError> {
        let mut batch = Self::new();
        for (key, query) in pairs {
            batch.push(key, query)?;
        }
        Ok(batch)
    }

    /// Adds a query.
    ///
    /// # Errors
    /// - `EmptyBatchKey` if `key` is empty.
    /// - `DuplicateBatchKey` if `key` is already present.
    pub fn push(&mut self, key: impl Into<String>, query: Query) -> Result<(), ValidationError> {
        let key = key.into();
        if key.is_empty() {
            return Err(ValidationError::EmptyBatchKey);
        }
        if !self.keys.insert(key.clone()) {
            return Err(ValidationError::DuplicateBatchKey { key });
        }
        self.entries.push((key, query));
        Ok(())
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the batch has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys and queries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Query)> {
        self.entries.iter().map(|(k, q)| (k.as_str(), q))
    }
}

impl IntoIterator for Batch {
    type Item = (String, Query);
    type IntoIter = std::vec::IntoIter<(String, Query)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Per-batch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Keys answered from a cached value.
    pub cache_hits: usize,
    /// Keys answered by a remembered failure.
    pub negative_hits: usize,
    /// Keys that joined a computation already in flight.
    pub coalesced: usize,
    /// Keys sent to the backend by this batch.
    pub submitted: usize,
    /// Keys the pool could not queue before the deadline.
    pub rejected: usize,
    /// Wall time from submission to the last collected key.
    pub elapsed: Duration,
}

/// Result of one batch.
///
/// Every submitted key is present. Keys whose backend call failed or did not
/// finish in time map to an empty list and are also listed in
/// [`failed_keys`](Self::failed_keys).
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub(crate) batch_id: BatchId,
    pub(crate) results: BTreeMap<String, Vec<Candidate>>,
    pub(crate) failed: Vec<String>,
    pub(crate) timed_out: Vec<String>,
    pub(crate) stats: BatchStats,
}

impl BatchResult {
    /// Correlation id, also recorded on the batch's tracing span.
    #[must_use]
    pub const fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    /// Candidates for `key`, if the key was in the batch.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[Candidate]> {
        self.results.get(key).map(Vec::as_slice)
    }

    /// All keys with their candidates.
    #[must_use]
    pub fn results(&self) -> &BTreeMap<String, Vec<Candidate>> {
        &self.results
    }

    /// Consumes the result, keeping only the candidate lists.
    #[must_use]
    pub fn into_results(self) -> BTreeMap<String, Vec<Candidate>> {
        self.results
    }

    /// Keys that produced no candidates because of a failure or timeout.
    #[must_use]
    pub fn failed_keys(&self) -> &[String] {
        &self.failed
    }

    /// Subset of the failed keys that hit the batch deadline.
    #[must_use]
    pub fn timed_out_keys(&self) -> &[String] {
        &self.timed_out
    }

    /// Returns true if any key hit the deadline.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        !self.timed_out.is_empty()
    }

    /// Counters collected while the batch ran.
    #[must_use]
    pub const fn stats(&self) -> &BatchStats {
        &self.stats
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true for an empty batch.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Serializes as `{"<key>": {"result": [candidate, ...]}, ...}`.
impl Serialize for BatchResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wrapped<'a> {
            result: &'a [Candidate],
        }

        let mut map = serializer.serialize_map(Some(self.results.len()))?;
        for (key, candidates) in &self.results {
            map.serialize_entry(key, &Wrapped { result: candidates })?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_duplicate_keys() {
        let mut batch = Batch::new();
        assert!(matches!(
            batch.push("", Query::text("a")),
            Err(ValidationError::EmptyBatchKey)
        ));
        batch.push("q0", Query::text("a")).unwrap();
        let err = batch.push("q0", Query::text("b")).unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateBatchKey { key } if key == "q0"));
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn from_pairs_keeps_order() {
        let batch = Batch::from_pairs([("b", Query::text("1")), ("a", Query::text("2"))]).unwrap();
        let keys: Vec<&str> = batch.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn result_serializes_in_wire_shape() {
        let mut results = BTreeMap::new();
        results.insert("q0".to_string(), vec![Candidate::new("1", "one", 1.0)]);
        results.insert("q1".to_string(), Vec::new());
        let result = BatchResult {
            batch_id: BatchId::new(),
            results,
            failed: vec!["q1".to_string()],
            timed_out: Vec::new(),
            stats: BatchStats::default(),
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["q0"]["result"][0]["id"], "1");
        assert_eq!(json["q0"]["result"][0]["name"], "one");
        assert_eq!(json["q1"]["result"], serde_json::json!([]));
        assert!(!result.timed_out());
    }

    #[test]
    fn phases_advance_in_order() {
        let mut tracker = PhaseTracker::new();
        assert_eq!(tracker.phase(), BatchPhase::Submitted);
        tracker.advance(BatchPhase::Dispatching);
        tracker.advance(BatchPhase::Collecting);
        tracker.advance(BatchPhase::Complete);
        assert_eq!(tracker.phase(), BatchPhase::Complete);
    }
}
