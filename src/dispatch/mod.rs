//! Batch dispatcher.
//!
//! [`QueryDispatcher`] fans a batch of keyed queries out to a
//! [`BackendAdapter`] on a bounded worker pool, deduplicating through the
//! single-flight [`ResultCache`], and collects the ranked results under one
//! batch-wide deadline.
//!
//! A key never fails the batch: backend errors, pool overflow and timeouts
//! all degrade to an empty candidate list for that key. The batch itself only
//! fails for invalid input or a dispatcher that has been shut down.

mod batch;
pub(crate) mod pool;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use tracing::{debug, info, warn, Level, Span};

use crate::backend::{BackendAdapter, CancelToken, PropertyProposal};
use crate::cache::{CacheStats, Lookup, Outcome, ResultCache, WaitOutcome, Waiter};
use crate::candidate::Candidate;
use crate::clock::{Clock, SystemClock};
use crate::config::DispatcherConfig;
use crate::error::{BackendError, FailureKind, ReconcileResult, ValidationError};
use crate::extend::{ColumnMetadata, ExtensionRequest, ExtensionResponse, PropertyRequest, Row};
use crate::fingerprint::QueryFingerprint;
use crate::policy::MatchPolicy;
use crate::query::Query;

pub use batch::{Batch, BatchId, BatchResult, BatchStats};

use batch::{BatchPhase, PhaseTracker};
use pool::WorkerPool;

/// Key used by [`QueryDispatcher::resolve_one`].
const SINGLE_KEY: &str = "q0";

/// Stand-in deadline when `now + batch_timeout` overflows `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 3600);

/// What a batch learned about one key.
enum Slot<V> {
    Done(Arc<V>),
    Failed,
    Waiting(Waiter<V>),
}

/// Deadline, cancel token and counters shared by everything one request
/// fans out.
struct Round {
    started: Instant,
    deadline: Instant,
    timeout: Duration,
    cancel: CancelToken,
    stats: BatchStats,
}

/// Keys submitted against one cache, not yet collected.
struct Submitted<'c, V> {
    cache: &'c ResultCache<V>,
    slots: Vec<(String, Slot<V>)>,
    owned: Vec<(QueryFingerprint, u64)>,
}

/// Collected values of one submission, in submission order.
struct Collected<V> {
    values: Vec<(String, Option<Arc<V>>)>,
    timed_out: Vec<String>,
}

/// Resolves batches of queries against one backend.
///
/// The dispatcher owns its worker threads. Dropping it (or calling
/// [`shutdown`](Self::shutdown)) lets queued work drain and joins them.
pub struct QueryDispatcher {
    adapter: Arc<dyn BackendAdapter>,
    policy: Arc<MatchPolicy>,
    cache: ResultCache<Vec<Candidate>>,
    extensions: ResultCache<Row>,
    columns: ResultCache<ColumnMetadata>,
    pool: WorkerPool,
    config: DispatcherConfig,
}

impl std::fmt::Debug for QueryDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryDispatcher")
            .field("backend", &self.adapter.name())
            .field("pool", &self.pool)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl QueryDispatcher {
    /// Creates a dispatcher using the system clock.
    ///
    /// # Errors
    /// Returns a validation error for an invalid `config` and a dispatch
    /// error if worker threads cannot be spawned.
    pub fn new(adapter: Arc<dyn BackendAdapter>, config: DispatcherConfig) -> ReconcileResult<Self> {
        Self::with_clock(adapter, config, Arc::new(SystemClock))
    }

    /// Creates a dispatcher whose caches read time from `clock`.
    pub fn with_clock(
        adapter: Arc<dyn BackendAdapter>,
        config: DispatcherConfig,
        clock: Arc<dyn Clock>,
    ) -> ReconcileResult<Self> {
        config.validate()?;
        let pool = WorkerPool::start("worker", config.pool.workers, config.pool.queue_capacity)?;
        info!(
            backend = adapter.name(),
            workers = config.pool.workers,
            queue_capacity = pool.queue_capacity(),
            cache_enabled = config.cache.enabled,
            "dispatcher_started"
        );

        Ok(Self {
            policy: Arc::new(MatchPolicy::from_config(&config.matching)),
            cache: ResultCache::with_clock(config.cache.clone(), Arc::clone(&clock)),
            extensions: ResultCache::with_clock(config.cache.clone(), Arc::clone(&clock)),
            columns: ResultCache::with_clock(config.cache.clone(), clock),
            adapter,
            pool,
            config,
        })
    }

    /// The configuration this dispatcher was built with.
    #[must_use]
    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Counters of the candidate cache.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Counters of the extension cache.
    #[must_use]
    pub fn extension_cache_stats(&self) -> CacheStats {
        self.extensions.stats()
    }

    /// Drops the cached result of `query`, if finished.
    pub fn invalidate(&self, query: &Query) -> bool {
        self.cache.invalidate(&query.fingerprint())
    }

    /// Drops every finished entry from all caches.
    pub fn clear_cache(&self) {
        self.cache.clear();
        self.extensions.clear();
        self.columns.clear();
    }

    /// Resolves every query in `batch`.
    ///
    /// Each distinct uncached query causes at most one backend call, even
    /// across concurrent batches. The call returns within the configured
    /// batch timeout; keys still unresolved by then map to empty lists and
    /// their backend calls are cancelled.
    ///
    /// # Errors
    /// Only [`DispatchError::Shutdown`](crate::error::DispatchError::Shutdown)
    /// after [`shutdown`](Self::shutdown).
    pub fn dispatch(&self, batch: Batch) -> ReconcileResult<BatchResult> {
        self.ensure_running()?;

        let batch_id = BatchId::new();
        let span = tracing::info_span!("batch", %batch_id, keys = batch.len());
        let _enter = span.enter();
        let started = Instant::now();
        let mut tracker = PhaseTracker::new();

        let work: Vec<_> = batch
            .into_iter()
            .map(|(key, query)| {
                let fingerprint = query.fingerprint();
                let adapter = Arc::clone(&self.adapter);
                let policy = Arc::clone(&self.policy);
                let compute = move |cancel: &CancelToken| -> Result<Vec<Candidate>, BackendError> {
                    let raw = adapter.resolve(&query, cancel)?;
                    Ok(policy.apply(&query, raw))
                };
                (key, fingerprint, compute)
            })
            .collect();

        let mut round = Round::new(started, self.config.batch_timeout);
        tracker.advance(BatchPhase::Dispatching);
        let submitted = self.submit(&mut round, &self.cache, work);
        tracker.advance(BatchPhase::Collecting);
        let collected = round.collect(submitted);
        let stats = round.finish();

        let mut failed = Vec::new();
        let results: BTreeMap<String, Vec<Candidate>> = collected
            .values
            .into_iter()
            .map(|(key, value)| match value {
                Some(candidates) => (key, candidates.as_ref().clone()),
                None => {
                    failed.push(key.clone());
                    (key, Vec::new())
                }
            })
            .collect();

        tracker.advance(BatchPhase::Complete);
        let result = BatchResult {
            batch_id,
            results,
            failed,
            timed_out: collected.timed_out,
            stats,
        };

        info!(
            keys = result.len(),
            failed = result.failed.len(),
            cache_hits = result.stats.cache_hits,
            coalesced = result.stats.coalesced,
            submitted = result.stats.submitted,
            elapsed_micros = micros(result.stats.elapsed),
            "batch_complete"
        );
        if tracing::enabled!(Level::DEBUG) {
            match serde_json::to_string(&result) {
                Ok(body) => debug!(response = %body, "batch_response"),
                Err(e) => debug!(error = %e, "batch_response_unserializable"),
            }
        }

        Ok(result)
    }

    /// Resolves a single query.
    pub fn resolve_one(&self, query: Query) -> ReconcileResult<Vec<Candidate>> {
        let mut batch = Batch::new();
        batch.push(SINGLE_KEY, query)?;
        let mut results = self.dispatch(batch)?.into_results();
        Ok(results.remove(SINGLE_KEY).unwrap_or_default())
    }

    /// Fetches property values for a list of entity ids.
    ///
    /// Rows are computed one task per id and column metadata one task per
    /// property, both cached like queries and bounded by the batch timeout.
    /// An id whose fetch fails gets a row of empty cells. Column metadata the
    /// backend cannot describe in time falls back to the property id.
    ///
    /// # Errors
    /// - Validation error for an empty id or property id.
    /// - `Shutdown` after [`shutdown`](Self::shutdown).
    pub fn extend(&self, request: ExtensionRequest) -> ReconcileResult<ExtensionResponse> {
        self.ensure_running()?;
        validate_extension(&request)?;

        let batch_id = BatchId::new();
        let span = tracing::info_span!(
            "extend",
            %batch_id,
            ids = request.ids.len(),
            properties = request.properties.len()
        );
        let _enter = span.enter();
        let started = Instant::now();
        let mut tracker = PhaseTracker::new();

        let columns: Vec<_> = request
            .properties
            .iter()
            .map(|p| {
                let adapter = Arc::clone(&self.adapter);
                let property = p.clone();
                let compute = move |_: &CancelToken| adapter.column_metadata(&property);
                (p.id.clone(), p.fingerprint(), compute)
            })
            .collect();

        let properties: Arc<[PropertyRequest]> = request.properties.iter().cloned().collect();
        let mut seen = HashSet::new();
        let work: Vec<_> = request
            .ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .map(|id| {
                let fingerprint = request.fingerprint_for(id);
                let adapter = Arc::clone(&self.adapter);
                let properties = Arc::clone(&properties);
                let entity = id.clone();
                let compute = move |cancel: &CancelToken| adapter.extend(&entity, &properties, cancel);
                (id.clone(), fingerprint, compute)
            })
            .collect();

        // Metadata and rows share one deadline.
        let mut round = Round::new(started, self.config.batch_timeout);
        tracker.advance(BatchPhase::Dispatching);
        let submitted_columns = self.submit(&mut round, &self.columns, columns);
        let submitted_rows = self.submit(&mut round, &self.extensions, work);
        tracker.advance(BatchPhase::Collecting);
        let collected_columns = round.collect(submitted_columns);
        let collected_rows = round.collect(submitted_rows);
        let stats = round.finish();

        let meta = collected_columns
            .values
            .into_iter()
            .map(|(id, column)| {
                column.map_or_else(
                    || {
                        debug!(property = %id, "column_metadata_fallback");
                        ColumnMetadata::bare(id)
                    },
                    |column| column.as_ref().clone(),
                )
            })
            .collect();

        let mut failed = 0usize;
        let rows = collected_rows
            .values
            .into_iter()
            .map(|(id, row)| {
                let row = row.map_or_else(
                    || {
                        failed += 1;
                        properties.iter().map(|p| (p.id.clone(), Vec::new())).collect()
                    },
                    |row| row.as_ref().clone(),
                );
                (id, row)
            })
            .collect();

        tracker.advance(BatchPhase::Complete);
        info!(
            failed,
            timed_out = collected_rows.timed_out.len() + collected_columns.timed_out.len(),
            cache_hits = stats.cache_hits,
            submitted = stats.submitted,
            elapsed_micros = micros(stats.elapsed),
            "extend_complete"
        );

        Ok(ExtensionResponse { meta, rows })
    }

    /// Asks the backend to suggest properties for `type_id`.
    ///
    /// Runs on the calling thread and is not cached.
    ///
    /// # Errors
    /// Backend errors, including `NotImplemented`, are returned as-is.
    pub fn propose_properties(&self, type_id: &str, limit: usize) -> ReconcileResult<Vec<PropertyProposal>> {
        self.ensure_running()?;
        if type_id.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "type".to_string(),
            }
            .into());
        }
        let mut proposals = self.adapter.propose_properties(type_id, limit)?;
        if limit > 0 {
            proposals.truncate(limit);
        }
        Ok(proposals)
    }

    /// Stops accepting work, drains the queue and joins the workers.
    pub fn shutdown(&mut self) {
        if self.pool.is_running() {
            self.pool.shutdown();
            info!(backend = self.adapter.name(), "dispatcher_stopped");
        }
    }

    fn ensure_running(&self) -> ReconcileResult<()> {
        if self.pool.is_running() {
            Ok(())
        } else {
            Err(crate::error::DispatchError::Shutdown.into())
        }
    }

    /// Looks every `(key, fingerprint, compute)` item up in `cache` and hands
    /// the ones this round owns to the pool.
    ///
    /// A full queue is waited on until the round deadline. A key that still
    /// cannot be queued gives its reservation back, so nothing is cached for
    /// it and the next request reaches the backend.
    fn submit<'c, V, F>(
        &self,
        round: &mut Round,
        cache: &'c ResultCache<V>,
        work: Vec<(String, QueryFingerprint, F)>,
    ) -> Submitted<'c, V>
    where
        V: Send + Sync + 'static,
        F: FnOnce(&CancelToken) -> Result<V, BackendError> + Send + 'static,
    {
        let mut owned = Vec::new();
        let mut slots = Vec::with_capacity(work.len());
        for (key, fingerprint, compute) in work {
            let slot = match cache.get_or_reserve(fingerprint) {
                Lookup::Ready(value) => {
                    round.stats.cache_hits += 1;
                    Slot::Done(value)
                }
                Lookup::Failed(kind) => {
                    round.stats.negative_hits += 1;
                    debug!(key = %key, fingerprint = %fingerprint.short(), ?kind, "negative_cache_hit");
                    Slot::Failed
                }
                Lookup::Pending(waiter) => {
                    round.stats.coalesced += 1;
                    Slot::Waiting(waiter)
                }
                Lookup::Owner(reservation) => {
                    let ticket = reservation.ticket();
                    let (tx, rx) = bounded::<Outcome<V>>(1);
                    let task_cache = cache.clone();
                    let task_cancel = round.cancel.clone();
                    let task_key = key.clone();
                    let span = Span::current();
                    let job = Box::new(move || {
                        let _enter = span.enter();
                        let outcome = run_task(&task_cache, reservation, compute, &task_cancel, &task_key);
                        // The batch may have stopped listening.
                        let _ = tx.send(outcome);
                    });
                    match self.pool.submit_until(job, round.deadline) {
                        Ok(()) => {
                            round.stats.submitted += 1;
                            owned.push((fingerprint, ticket));
                            Slot::Waiting(Waiter::new(fingerprint, rx))
                        }
                        Err(rejected) => {
                            // Release before the job (and its reservation) is dropped.
                            cache.release_ticket(fingerprint, ticket);
                            drop(rejected.job);
                            round.stats.rejected += 1;
                            warn!(
                                key = %key,
                                fingerprint = %fingerprint.short(),
                                error = %rejected.error,
                                "task_rejected"
                            );
                            Slot::Failed
                        }
                    }
                }
            };
            slots.push((key, slot));
        }

        Submitted { cache, slots, owned }
    }
}

impl Round {
    fn new(started: Instant, timeout: Duration) -> Self {
        let deadline = started
            .checked_add(timeout)
            .or_else(|| started.checked_add(FAR_FUTURE))
            .unwrap_or(started);
        Self {
            started,
            deadline,
            timeout,
            cancel: CancelToken::new(),
            stats: BatchStats::default(),
        }
    }

    /// Waits for every submitted key until the round deadline.
    ///
    /// If anything timed out, the round is cancelled and the reservations
    /// this submission owns are abandoned.
    fn collect<V>(&self, submitted: Submitted<'_, V>) -> Collected<V>
    where
        V: Send + Sync + 'static,
    {
        let mut timed_out = Vec::new();
        let values = submitted
            .slots
            .into_iter()
            .map(|(key, slot)| {
                let value = match slot {
                    Slot::Done(value) => Some(value),
                    Slot::Failed => None,
                    Slot::Waiting(waiter) => match waiter.wait_deadline(self.deadline) {
                        WaitOutcome::Ready(value) => Some(value),
                        WaitOutcome::Failed(_) => None,
                        WaitOutcome::TimedOut => {
                            timed_out.push(key.clone());
                            None
                        }
                    },
                };
                (key, value)
            })
            .collect();

        if !timed_out.is_empty() {
            self.cancel.cancel();
            for (fingerprint, ticket) in submitted.owned {
                submitted.cache.abandon(fingerprint, ticket);
            }
            warn!(
                timed_out = timed_out.len(),
                timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                "batch_timeout"
            );
        }

        Collected { values, timed_out }
    }

    fn finish(mut self) -> BatchStats {
        self.stats.elapsed = self.started.elapsed();
        self.stats
    }
}

/// Body of one pool task: compute, then publish to the cache.
fn run_task<V, F>(
    cache: &ResultCache<V>,
    reservation: crate::cache::Reservation<V>,
    compute: F,
    cancel: &CancelToken,
    key: &str,
) -> Outcome<V>
where
    V: Send + Sync + 'static,
    F: FnOnce(&CancelToken) -> Result<V, BackendError>,
{
    let fingerprint = reservation.fingerprint();
    if cancel.is_cancelled() {
        cache.fail(reservation, FailureKind::Transient);
        return Err(FailureKind::Transient);
    }

    let started = Instant::now();
    match compute(cancel) {
        Ok(value) => {
            debug!(
                key,
                fingerprint = %fingerprint.short(),
                elapsed_micros = micros(started.elapsed()),
                "backend_call_complete"
            );
            Ok(cache.complete(reservation, value))
        }
        Err(BackendError::Cancelled) => {
            debug!(key, fingerprint = %fingerprint.short(), "backend_call_cancelled");
            cache.fail(reservation, FailureKind::Transient);
            Err(FailureKind::Transient)
        }
        Err(e @ BackendError::NotImplemented { .. }) => {
            debug!(key, fingerprint = %fingerprint.short(), error = %e, "backend_capability_missing");
            cache.fail(reservation, e.failure_kind());
            Err(e.failure_kind())
        }
        Err(e) => {
            let kind = e.failure_kind();
            warn!(
                key,
                fingerprint = %fingerprint.short(),
                transient = e.is_transient(),
                error = %e,
                elapsed_micros = micros(started.elapsed()),
                "backend_failure"
            );
            cache.fail(reservation, kind);
            Err(kind)
        }
    }
}

fn validate_extension(request: &ExtensionRequest) -> Result<(), ValidationError> {
    if request.ids.iter().any(|id| id.trim().is_empty()) {
        return Err(ValidationError::InvalidField {
            field: "ids".to_string(),
            reason: "entity id cannot be empty".to_string(),
        });
    }
    if request.properties.iter().any(|p| p.id.trim().is_empty()) {
        return Err(ValidationError::InvalidField {
            field: "properties".to_string(),
            reason: "property id cannot be empty".to_string(),
        });
    }
    Ok(())
}

fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryBackend, Record};
    use crate::error::{DispatchError, ReconcileError};
    use crate::extend::Cell;
    use crate::query::TypeRef;

    fn backend() -> Arc<InMemoryBackend> {
        Arc::new(InMemoryBackend::new("test").with_records([
            Record::new("1", "Alice")
                .typed(TypeRef::new("Person"))
                .property("born", Cell::Int(1990)),
            Record::new("2", "Bob").typed(TypeRef::new("Person")),
        ]))
    }

    fn dispatcher(backend: &Arc<InMemoryBackend>) -> QueryDispatcher {
        let config = DispatcherConfig {
            batch_timeout: Duration::from_secs(5),
            ..DispatcherConfig::default()
        };
        QueryDispatcher::new(Arc::clone(backend) as Arc<dyn BackendAdapter>, config).unwrap()
    }

    #[test]
    fn resolves_batch_and_marks_exact_match() {
        let backend = backend();
        let d = dispatcher(&backend);
        let batch = Batch::from_pairs([("q0", Query::text("Alice")), ("q1", Query::text("Bob"))]).unwrap();

        let result = d.dispatch(batch).unwrap();
        assert_eq!(result.len(), 2);
        let alice = result.get("q0").unwrap();
        assert_eq!(alice[0].id, "1");
        assert!(alice[0].is_match);
        assert!(result.failed_keys().is_empty());
        assert_eq!(result.stats().submitted, 2);
    }

    #[test]
    fn identical_queries_in_one_batch_share_a_backend_call() {
        let backend = backend();
        // Keep the first call in flight while the second key is looked up.
        backend.set_latency(Duration::from_millis(50));
        let d = dispatcher(&backend);
        let batch = Batch::from_pairs([("a", Query::text("Alice")), ("b", Query::text("Alice"))]).unwrap();

        let result = d.dispatch(batch).unwrap();
        assert_eq!(result.get("a"), result.get("b"));
        assert_eq!(backend.resolve_calls(), 1);
        assert_eq!(result.stats().coalesced, 1);
    }

    #[test]
    fn repeated_batch_is_served_from_cache() {
        let backend = backend();
        let d = dispatcher(&backend);
        let first = d.resolve_one(Query::text("Alice")).unwrap();
        let second = d.resolve_one(Query::text("Alice")).unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.resolve_calls(), 1);
        assert_eq!(d.cache_stats().hits, 1);
    }

    #[test]
    fn failing_key_degrades_to_empty_list() {
        let backend = backend();
        backend.fail_on("Bob", BackendError::permanent("bad"));
        let d = dispatcher(&backend);
        let batch = Batch::from_pairs([("q0", Query::text("Alice")), ("q1", Query::text("Bob"))]).unwrap();

        let result = d.dispatch(batch).unwrap();
        assert!(!result.get("q0").unwrap().is_empty());
        assert!(result.get("q1").unwrap().is_empty());
        assert_eq!(result.failed_keys(), ["q1".to_string()]);
        assert!(!result.timed_out());
    }

    #[test]
    fn shut_down_dispatcher_rejects_batches() {
        let backend = backend();
        let mut d = dispatcher(&backend);
        d.shutdown();
        let err = d.dispatch(Batch::new()).unwrap_err();
        assert!(matches!(err, ReconcileError::Dispatch(DispatchError::Shutdown)));
        d.shutdown();
    }

    #[test]
    fn empty_batch_is_empty_result() {
        let backend = backend();
        let d = dispatcher(&backend);
        assert!(d.dispatch(Batch::new()).unwrap().is_empty());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = DispatcherConfig::default();
        config.pool.workers = 0;
        let err = QueryDispatcher::new(backend() as Arc<dyn BackendAdapter>, config).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn extend_fills_rows_and_falls_back_on_metadata() {
        let backend = backend();
        let d = dispatcher(&backend);
        let response = d
            .extend(ExtensionRequest {
                ids: vec!["1".to_string(), "missing".to_string(), "1".to_string()],
                properties: vec![PropertyRequest::new("born")],
            })
            .unwrap();

        assert_eq!(response.meta, vec![ColumnMetadata::bare("born")]);
        assert_eq!(response.rows.len(), 2);
        assert_eq!(response.rows["1"]["born"], vec![Cell::Int(1990)]);
        assert!(response.rows["missing"]["born"].is_empty());
        assert_eq!(backend.extend_calls(), 2);
    }

    #[test]
    fn repeated_extension_is_served_from_cache() {
        let backend = backend();
        let d = dispatcher(&backend);
        let request = ExtensionRequest {
            ids: vec!["1".to_string()],
            properties: vec![PropertyRequest::new("born")],
        };

        let first = d.extend(request.clone()).unwrap();
        let second = d.extend(request).unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.extend_calls(), 1);
        assert_eq!(d.extension_cache_stats().hits, 1);
    }

    #[test]
    fn slow_extension_is_cancelled_at_the_deadline() {
        let backend = backend();
        backend.set_latency(Duration::from_secs(10));
        let mut config = DispatcherConfig {
            batch_timeout: Duration::from_millis(100),
            ..DispatcherConfig::default()
        };
        config.cache.negative_ttl = Duration::ZERO;
        let d = QueryDispatcher::new(Arc::clone(&backend) as Arc<dyn BackendAdapter>, config).unwrap();
        let request = ExtensionRequest {
            ids: vec!["1".to_string()],
            properties: vec![PropertyRequest::new("born")],
        };

        let started = Instant::now();
        let response = d.extend(request.clone()).unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(response.rows["1"]["born"].is_empty());

        // The cancelled row was not cached, so a retry calls the backend again.
        backend.set_latency(Duration::ZERO);
        let retry = d.extend(request).unwrap();
        assert_eq!(retry.rows["1"]["born"], vec![Cell::Int(1990)]);
        assert_eq!(backend.extend_calls(), 2);
    }

    #[test]
    fn extend_rejects_empty_ids() {
        let backend = backend();
        let d = dispatcher(&backend);
        let err = d
            .extend(ExtensionRequest {
                ids: vec![String::new()],
                properties: Vec::new(),
            })
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn propose_properties_passes_through() {
        let backend = backend();
        let d = dispatcher(&backend);
        let proposals = d.propose_properties("Person", 0).unwrap();
        assert_eq!(proposals[0].id, "born");
        assert!(d.propose_properties(" ", 3).unwrap_err().is_validation());
    }
}
