//! In-memory backend.
//!
//! A thread-safe record store implementing every [`BackendAdapter`]
//! capability. It is intended for embedded usage, tests and benchmarks, and
//! as a reference for adapter authors. Latency and failures can be injected
//! to exercise the dispatcher.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::thread;
use std::time::{Duration, Instant};

use crate::backend::{BackendAdapter, CancelToken, PropertyProposal};
use crate::candidate::{Candidate, EXACT_MATCH_SCORE};
use crate::error::BackendError;
use crate::extend::{Cell, ColumnMetadata, PropertyRequest, Row};
use crate::query::{Query, TypeRef};
use crate::similarity::{normalize_label, JaroWinkler, SimilarityScorer};

/// Candidates scoring below this are not returned.
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.6;

/// Cancellation is polled at least this often while sleeping.
const CANCEL_POLL: Duration = Duration::from_millis(5);

/// One entity known to the in-memory backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Unique id. Queries equal to it resolve to this record alone.
    pub id: String,
    /// Primary label.
    pub name: String,
    /// Alternative labels, scored like the name.
    pub aliases: Vec<String>,
    /// Types the record carries.
    pub types: Vec<TypeRef>,
    /// Property values by property id.
    pub properties: BTreeMap<String, Vec<Cell>>,
}

impl Record {
    /// A record with no aliases, types or properties.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            aliases: Vec::new(),
            types: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Adds an alias.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Adds a type.
    #[must_use]
    pub fn typed(mut self, ty: TypeRef) -> Self {
        self.types.push(ty);
        self
    }

    /// Appends a value to a property.
    #[must_use]
    pub fn property(mut self, id: impl Into<String>, value: Cell) -> Self {
        self.properties.entry(id.into()).or_default().push(value);
        self
    }
}

#[derive(Debug, Default)]
struct Faults {
    latency: Duration,
    failures: HashMap<String, BackendError>,
}

/// Thread-safe in-memory [`BackendAdapter`].
#[derive(Debug)]
pub struct InMemoryBackend {
    name: String,
    records: RwLock<Vec<Record>>,
    properties: RwLock<BTreeMap<String, ColumnMetadata>>,
    faults: RwLock<Faults>,
    min_similarity: f64,
    scorer: JaroWinkler,
    resolve_calls: AtomicU64,
    extend_calls: AtomicU64,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new("memory")
    }
}

fn lock_err(context: &'static str) -> BackendError {
    BackendError::transient(format!("poisoned lock: {context}"))
}

impl InMemoryBackend {
    /// An empty store named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: RwLock::new(Vec::new()),
            properties: RwLock::new(BTreeMap::new()),
            faults: RwLock::new(Faults::default()),
            min_similarity: DEFAULT_MIN_SIMILARITY,
            scorer: JaroWinkler::default(),
            resolve_calls: AtomicU64::new(0),
            extend_calls: AtomicU64::new(0),
        }
    }

    /// Sets the similarity cutoff for returned candidates.
    #[must_use]
    pub fn with_min_similarity(mut self, min_similarity: f64) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    /// Adds records, replacing any earlier record with the same id.
    #[must_use]
    pub fn with_records(self, records: impl IntoIterator<Item = Record>) -> Self {
        if let Ok(mut guard) = self.records.write() {
            for record in records {
                guard.retain(|r| r.id != record.id);
                guard.push(record);
            }
        }
        self
    }

    /// Adds or replaces one record.
    pub fn insert(&self, record: Record) -> Result<(), BackendError> {
        let mut records = self.records.write().map_err(|_| lock_err("records"))?;
        records.retain(|r| r.id != record.id);
        records.push(record);
        Ok(())
    }

    /// Declares metadata for a property so extension columns get a name.
    pub fn describe_property(&self, meta: ColumnMetadata) -> Result<(), BackendError> {
        let mut properties = self.properties.write().map_err(|_| lock_err("properties"))?;
        properties.insert(meta.id.clone(), meta);
        Ok(())
    }

    /// Every call sleeps this long first, waking early on cancellation.
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut faults) = self.faults.write() {
            faults.latency = latency;
        }
    }

    /// Makes queries with this exact text (or extension of this id) fail.
    pub fn fail_on(&self, key: impl Into<String>, error: BackendError) {
        if let Ok(mut faults) = self.faults.write() {
            faults.failures.insert(key.into(), error);
        }
    }

    /// Removes every injected failure.
    pub fn clear_failures(&self) {
        if let Ok(mut faults) = self.faults.write() {
            faults.failures.clear();
        }
    }

    /// Number of `resolve` calls so far.
    #[must_use]
    pub fn resolve_calls(&self) -> u64 {
        self.resolve_calls.load(Ordering::Relaxed)
    }

    /// Number of `extend` calls so far.
    #[must_use]
    pub fn extend_calls(&self) -> u64 {
        self.extend_calls.load(Ordering::Relaxed)
    }

    fn inject(&self, key: &str, cancel: &CancelToken) -> Result<(), BackendError> {
        let (latency, failure) = {
            let faults = self.faults.read().map_err(|_| lock_err("faults"))?;
            (faults.latency, faults.failures.get(key).cloned())
        };

        if !latency.is_zero() {
            let until = Instant::now() + latency;
            loop {
                cancel.check()?;
                let left = until.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    break;
                }
                thread::sleep(left.min(CANCEL_POLL));
            }
        }
        cancel.check()?;

        failure.map_or(Ok(()), Err)
    }

    /// Best label similarity of a record against normalized query text.
    fn label_score(&self, record: &Record, text: &str) -> f64 {
        std::iter::once(&record.name)
            .chain(record.aliases.iter())
            .map(|label| self.scorer.score(text, &normalize_label(label)))
            .fold(0.0_f64, f64::max)
    }

    /// Scales a label score by the mean score of the query's property
    /// constraints. Soft constraints on missing properties do not count.
    fn apply_constraints(query: &Query, record: &Record, label_score: f64) -> f64 {
        let scores: Vec<f64> = query
            .properties()
            .iter()
            .filter_map(|c| {
                let actual = record
                    .properties
                    .get(&c.property_id)
                    .map_or(&[][..], Vec::as_slice);
                c.options.evaluate(&c.expected.as_comparable(), actual)
            })
            .collect();

        if scores.is_empty() {
            return label_score;
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        label_score * mean
    }

    fn candidate(record: &Record, score: f64) -> Candidate {
        Candidate {
            id: record.id.clone(),
            label: record.name.clone(),
            types: record.types.clone(),
            score,
            is_match: false,
        }
    }
}

impl BackendAdapter for InMemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, query: &Query, cancel: &CancelToken) -> Result<Vec<Candidate>, BackendError> {
        self.resolve_calls.fetch_add(1, Ordering::Relaxed);
        self.inject(query.query_text(), cancel)?;

        let records = self.records.read().map_err(|_| lock_err("records"))?;

        // A query naming a record id resolves to that record only.
        if let Some(record) = records.iter().rev().find(|r| r.id == query.query_text()) {
            let score = Self::apply_constraints(query, record, EXACT_MATCH_SCORE);
            return Ok(vec![Self::candidate(record, score)]);
        }

        let text = normalize_label(query.query_text());
        let mut out = Vec::new();
        for (i, record) in records.iter().enumerate() {
            if i % 256 == 0 {
                cancel.check()?;
            }
            let label_score = self.label_score(record, &text);
            if label_score < self.min_similarity {
                continue;
            }
            let score = Self::apply_constraints(query, record, label_score);
            out.push(Self::candidate(record, score));
        }
        Ok(out)
    }

    fn extend(
        &self,
        id: &str,
        properties: &[PropertyRequest],
        cancel: &CancelToken,
    ) -> Result<Row, BackendError> {
        self.extend_calls.fetch_add(1, Ordering::Relaxed);
        self.inject(id, cancel)?;

        let records = self.records.read().map_err(|_| lock_err("records"))?;
        let record = records
            .iter()
            .rev()
            .find(|r| r.id == id)
            .ok_or_else(|| BackendError::permanent(format!("unknown entity '{id}'")))?;

        Ok(properties
            .iter()
            .map(|p| {
                let cells = record.properties.get(&p.id).cloned().unwrap_or_default();
                (p.id.clone(), cells)
            })
            .collect())
    }

    fn column_metadata(&self, property: &PropertyRequest) -> Result<ColumnMetadata, BackendError> {
        let properties = self.properties.read().map_err(|_| lock_err("properties"))?;
        properties
            .get(&property.id)
            .cloned()
            .ok_or_else(|| BackendError::permanent(format!("unknown property '{}'", property.id)))
    }

    fn propose_properties(
        &self,
        type_id: &str,
        limit: usize,
    ) -> Result<Vec<PropertyProposal>, BackendError> {
        let records = self.records.read().map_err(|_| lock_err("records"))?;
        let described = self.properties.read().map_err(|_| lock_err("properties"))?;

        // Properties used by records of the type, most common first.
        let mut usage: BTreeMap<&str, usize> = BTreeMap::new();
        for record in records.iter().filter(|r| r.types.iter().any(|t| t.id == type_id)) {
            for pid in record.properties.keys() {
                *usage.entry(pid.as_str()).or_default() += 1;
            }
        }
        let mut ranked: Vec<(&str, usize)> = usage.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        if limit > 0 {
            ranked.truncate(limit);
        }

        Ok(ranked
            .into_iter()
            .map(|(pid, _)| PropertyProposal {
                id: pid.to_string(),
                name: described
                    .get(pid)
                    .map_or_else(|| pid.to_string(), |m| m.name.clone()),
            })
            .collect())
    }
}
