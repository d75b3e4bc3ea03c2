//! Single-flight result cache.
//!
//! The cache maps a [`QueryFingerprint`] to either a finished value, a
//! remembered failure, or an in-flight computation. [`ResultCache::get_or_reserve`]
//! is the only way in, and it hands out at most one [`Reservation`] per
//! fingerprint at a time: everyone else asking for the same fingerprint gets
//! a [`Waiter`] and is woken when the owner completes or fails.
//!
//! All state sits behind one mutex that is only held for map bookkeeping,
//! never across a backend call or a channel send.

mod entry;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::bounded;
use lru::LruCache;

use crate::candidate::Candidate;
use crate::clock::{add_saturating, Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::FailureKind;
use crate::fingerprint::QueryFingerprint;

pub use entry::{CacheStats, Lookup, Outcome, WaitOutcome, Waiter};

use entry::{Entry, Slot};

/// Ticket handed out when the cache is disabled. Never stored.
const UNTRACKED_TICKET: u64 = 0;

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    negative_hits: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

struct State<V> {
    entries: LruCache<QueryFingerprint, Entry<V>>,
    next_ticket: u64,
}

struct Inner<V> {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<State<V>>,
    counters: Counters,
}

impl<V> Inner<V> {
    fn lock(&self) -> MutexGuard<'_, State<V>> {
        // Bookkeeping never panics mid-update, so a poisoned lock still holds
        // a consistent map.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Time- and size-bounded, key-deduplicating result store.
///
/// Cloning is cheap and clones share the same storage.
pub struct ResultCache<V = Vec<Candidate>> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for ResultCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for ResultCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("config", &self.inner.config)
            .field("entries", &self.len())
            .finish()
    }
}

impl<V> ResultCache<V> {
    /// Number of stored entries, pending ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive right to compute one fingerprint.
///
/// Pass it back to [`ResultCache::complete`] or [`ResultCache::fail`].
/// Dropping it unfinished fails the entry transiently so waiters are not
/// left hanging.
#[must_use = "a reservation must be completed or failed"]
pub struct Reservation<V> {
    inner: Option<Arc<Inner<V>>>,
    fingerprint: QueryFingerprint,
    ticket: u64,
}

impl<V> std::fmt::Debug for Reservation<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("fingerprint", &self.fingerprint)
            .field("ticket", &self.ticket)
            .finish()
    }
}

impl<V> Reservation<V> {
    /// The fingerprint this reservation owns.
    #[must_use]
    pub const fn fingerprint(&self) -> QueryFingerprint {
        self.fingerprint
    }

    pub(crate) const fn ticket(&self) -> u64 {
        self.ticket
    }
}

impl<V> Drop for Reservation<V> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            tracing::debug!(fingerprint = %self.fingerprint.short(), "reservation_abandoned");
            finish(&inner, self.fingerprint, self.ticket, Err(FailureKind::Transient));
        }
    }
}

impl<V> ResultCache<V>
where
    V: Send + Sync + 'static,
{
    /// Creates a cache using the system clock.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a cache with an explicit clock.
    #[must_use]
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                state: Mutex::new(State {
                    entries: LruCache::unbounded(),
                    next_ticket: UNTRACKED_TICKET + 1,
                }),
                counters: Counters::default(),
            }),
        }
    }

    /// Returns true if caching is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.config.enabled
    }

    /// Looks up `fingerprint`, reserving it for the caller on a miss.
    ///
    /// Atomic with respect to other callers: for a given fingerprint exactly
    /// one concurrent caller receives [`Lookup::Owner`].
    pub fn get_or_reserve(&self, fingerprint: QueryFingerprint) -> Lookup<V> {
        let inner = &self.inner;
        if !inner.config.enabled {
            inner.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Lookup::Owner(Reservation {
                inner: None,
                fingerprint,
                ticket: UNTRACKED_TICKET,
            });
        }

        let now = inner.clock.now();
        let mut state = inner.lock();

        if let Some(entry) = state.entries.get_mut(&fingerprint) {
            match &mut entry.slot {
                Slot::Ready { value, expires_at } if *expires_at > now => {
                    inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Lookup::Ready(Arc::clone(value));
                }
                Slot::Failed { kind, expires_at } if *expires_at > now => {
                    inner.counters.negative_hits.fetch_add(1, Ordering::Relaxed);
                    return Lookup::Failed(*kind);
                }
                Slot::Pending { waiters, .. } => {
                    let (tx, rx) = bounded(1);
                    waiters.push(tx);
                    inner.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    return Lookup::Pending(Waiter::new(fingerprint, rx));
                }
                Slot::Ready { .. } | Slot::Failed { .. } => {
                    inner.counters.expirations.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(
                        fingerprint = %fingerprint.short(),
                        age_ms = (now - entry.created_at).num_milliseconds(),
                        "cache_entry_expired"
                    );
                }
            }
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.entries.put(fingerprint, Entry::pending(ticket, now));
        inner.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.enforce_bound(&mut state);

        Lookup::Owner(Reservation {
            inner: Some(Arc::clone(inner)),
            fingerprint,
            ticket,
        })
    }

    /// Stores the computed value and wakes all waiters.
    ///
    /// Returns the shared value. If the reservation is stale (its entry was
    /// already failed or replaced) the value is returned but not stored.
    pub fn complete(&self, mut reservation: Reservation<V>, value: V) -> Arc<V> {
        let value = Arc::new(value);
        if let Some(inner) = reservation.inner.take() {
            finish(&inner, reservation.fingerprint, reservation.ticket, Ok(Arc::clone(&value)));
        }
        value
    }

    /// Records a failure and wakes all waiters with it.
    pub fn fail(&self, mut reservation: Reservation<V>, kind: FailureKind) {
        if let Some(inner) = reservation.inner.take() {
            finish(&inner, reservation.fingerprint, reservation.ticket, Err(kind));
        }
    }

    /// Fails the entry reserved under `ticket` on behalf of an owner that can
    /// no longer be waited for. The owner's later `complete` is ignored.
    pub(crate) fn abandon(&self, fingerprint: QueryFingerprint, ticket: u64) {
        if ticket != UNTRACKED_TICKET {
            finish(&self.inner, fingerprint, ticket, Err(FailureKind::Transient));
        }
    }

    /// Gives the reservation back without recording an outcome.
    ///
    /// The pending entry is removed, so the next lookup reserves afresh and
    /// nothing is negative-cached. Current waiters are woken with a
    /// transient failure.
    pub fn release(&self, mut reservation: Reservation<V>) {
        if let Some(inner) = reservation.inner.take() {
            remove_pending(&inner, reservation.fingerprint, reservation.ticket);
        }
    }

    /// [`release`](Self::release) for a reservation that was moved into a job
    /// which never ran. The job's own reservation becomes stale.
    pub(crate) fn release_ticket(&self, fingerprint: QueryFingerprint, ticket: u64) {
        if ticket != UNTRACKED_TICKET {
            remove_pending(&self.inner, fingerprint, ticket);
        }
    }

    /// Removes a finished entry. Pending entries are left alone.
    pub fn invalidate(&self, fingerprint: &QueryFingerprint) -> bool {
        let mut state = self.inner.lock();
        match state.entries.peek(fingerprint) {
            Some(entry) if !entry.is_pending() => state.entries.pop(fingerprint).is_some(),
            _ => false,
        }
    }

    /// Removes every finished entry.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        let finished: Vec<QueryFingerprint> = state
            .entries
            .iter()
            .filter(|(_, e)| !e.is_pending())
            .map(|(k, _)| *k)
            .collect();
        for key in finished {
            state.entries.pop(&key);
        }
    }

    /// Drops every expired entry now instead of waiting for a lookup.
    pub fn purge_expired(&self) -> usize {
        let now = self.inner.clock.now();
        let mut state = self.inner.lock();
        let expired: Vec<QueryFingerprint> = state
            .entries
            .iter()
            .filter(|(_, e)| match &e.slot {
                Slot::Ready { expires_at, .. } | Slot::Failed { expires_at, .. } => *expires_at <= now,
                Slot::Pending { .. } => false,
            })
            .map(|(k, _)| *k)
            .collect();
        for key in &expired {
            state.entries.pop(key);
        }
        self.inner
            .counters
            .expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            negative_hits: c.negative_hits.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            expirations: c.expirations.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    /// Evicts least recently used finished entries until the bound holds.
    ///
    /// Pending entries are skipped: evicting one would strand its waiters.
    /// If only pending entries remain the cache runs over its bound until
    /// some of them finish.
    fn enforce_bound(&self, state: &mut State<V>) {
        let max = self.inner.config.max_entries.max(1);
        while state.entries.len() > max {
            let victim = state
                .entries
                .iter()
                .rev()
                .find(|(_, e)| !e.is_pending())
                .map(|(k, _)| *k);
            let Some(victim) = victim else {
                tracing::debug!(
                    entries = state.entries.len(),
                    max_entries = max,
                    "cache_capacity_exceeded"
                );
                break;
            };
            state.entries.pop(&victim);
            self.inner.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn owns_pending<V>(state: &State<V>, fingerprint: &QueryFingerprint, ticket: u64) -> bool {
    matches!(
        state.entries.peek(fingerprint).map(|e| &e.slot),
        Some(Slot::Pending { ticket: t, .. }) if *t == ticket
    )
}

/// Drops a pending entry without storing anything.
fn remove_pending<V>(inner: &Inner<V>, fingerprint: QueryFingerprint, ticket: u64) {
    let waiters = {
        let mut state = inner.lock();
        if !owns_pending(&state, &fingerprint, ticket) {
            return;
        }
        match state.entries.pop(&fingerprint).map(|e| e.slot) {
            Some(Slot::Pending { waiters, .. }) => waiters,
            _ => Vec::new(),
        }
    };

    tracing::debug!(fingerprint = %fingerprint.short(), waiters = waiters.len(), "reservation_released");
    for tx in waiters {
        let _ = tx.send(Err(FailureKind::Transient));
    }
}

/// Moves a pending entry to its final state and notifies waiters.
fn finish<V>(inner: &Inner<V>, fingerprint: QueryFingerprint, ticket: u64, outcome: Outcome<V>) {
    let now = inner.clock.now();
    let waiters = {
        let mut state = inner.lock();
        if !owns_pending(&state, &fingerprint, ticket) {
            tracing::debug!(fingerprint = %fingerprint.short(), ticket, "stale_reservation_ignored");
            return;
        }

        let ttl = match &outcome {
            Ok(_) | Err(FailureKind::Permanent) => inner.config.ttl,
            Err(FailureKind::Transient) => inner.config.negative_ttl,
        };

        let Some(entry) = state.entries.peek_mut(&fingerprint) else {
            return;
        };
        let created_at = entry.created_at;
        let next = match &outcome {
            Ok(value) => Slot::Ready {
                value: Arc::clone(value),
                expires_at: add_saturating(now, ttl),
            },
            Err(kind) => Slot::Failed {
                kind: *kind,
                expires_at: add_saturating(now, ttl),
            },
        };
        let previous = std::mem::replace(&mut entry.slot, next);

        if ttl.is_zero() {
            state.entries.pop(&fingerprint);
        }

        tracing::trace!(
            fingerprint = %fingerprint.short(),
            ok = outcome.is_ok(),
            compute_ms = (now - created_at).num_milliseconds(),
            "cache_entry_finished"
        );

        match previous {
            Slot::Pending { waiters, .. } => waiters,
            Slot::Ready { .. } | Slot::Failed { .. } => Vec::new(),
        }
    };

    for tx in waiters {
        // A waiter that gave up has dropped its receiver.
        let _ = tx.send(outcome.clone());
    }
}
