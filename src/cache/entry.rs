//! Cache entry states and the handles given to callers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::FailureKind;
use crate::fingerprint::QueryFingerprint;

use super::Reservation;

/// What a finished computation delivers to everyone waiting on it.
pub type Outcome<V> = Result<Arc<V>, FailureKind>;

#[derive(Debug)]
pub(crate) enum Slot<V> {
    Pending {
        ticket: u64,
        waiters: Vec<Sender<Outcome<V>>>,
    },
    Ready {
        value: Arc<V>,
        expires_at: DateTime<Utc>,
    },
    Failed {
        kind: FailureKind,
        expires_at: DateTime<Utc>,
    },
}

#[derive(Debug)]
pub(crate) struct Entry<V> {
    pub(crate) slot: Slot<V>,
    pub(crate) created_at: DateTime<Utc>,
}

impl<V> Entry<V> {
    pub(crate) fn pending(ticket: u64, now: DateTime<Utc>) -> Self {
        Self {
            slot: Slot::Pending {
                ticket,
                waiters: Vec::new(),
            },
            created_at: now,
        }
    }

    pub(crate) const fn is_pending(&self) -> bool {
        matches!(self.slot, Slot::Pending { .. })
    }
}

/// Result of [`ResultCache::get_or_reserve`](super::ResultCache::get_or_reserve).
#[derive(Debug)]
pub enum Lookup<V> {
    /// A fresh value is cached.
    Ready(Arc<V>),
    /// Another caller is computing this value; wait on the handle.
    Pending(Waiter<V>),
    /// Nobody is computing it: the caller owns the computation and must
    /// complete or fail the reservation.
    Owner(Reservation<V>),
    /// A recent failure is still remembered; do not call the backend.
    Failed(FailureKind),
}

impl<V> Lookup<V> {
    /// Short label for logs and tests.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Ready(_) => "ready",
            Self::Pending(_) => "pending",
            Self::Owner(_) => "owner",
            Self::Failed(_) => "failed",
        }
    }
}

/// How a wait on an in-flight computation ended.
#[derive(Debug)]
pub enum WaitOutcome<V> {
    /// The owner completed with this value.
    Ready(Arc<V>),
    /// The owner failed, gave up, or vanished.
    Failed(FailureKind),
    /// The deadline passed first. The computation may still finish.
    TimedOut,
}

/// Handle for awaiting a computation owned by someone else.
///
/// Waiting blocks the calling thread on a channel; there is no polling.
#[derive(Debug)]
pub struct Waiter<V> {
    fingerprint: QueryFingerprint,
    rx: Receiver<Outcome<V>>,
}

impl<V> Waiter<V> {
    pub(crate) fn new(fingerprint: QueryFingerprint, rx: Receiver<Outcome<V>>) -> Self {
        Self { fingerprint, rx }
    }

    /// The fingerprint being computed.
    #[must_use]
    pub const fn fingerprint(&self) -> QueryFingerprint {
        self.fingerprint
    }

    /// Waits until `deadline`.
    ///
    /// A computation whose owner vanished without finishing is reported as a
    /// transient failure.
    pub fn wait_deadline(&self, deadline: Instant) -> WaitOutcome<V> {
        let timeout = deadline.saturating_duration_since(Instant::now());
        self.wait_timeout(timeout)
    }

    /// Waits for at most `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> WaitOutcome<V> {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(value)) => WaitOutcome::Ready(value),
            Ok(Err(kind)) => WaitOutcome::Failed(kind),
            Err(RecvTimeoutError::Timeout) => WaitOutcome::TimedOut,
            Err(RecvTimeoutError::Disconnected) => WaitOutcome::Failed(FailureKind::Transient),
        }
    }

    /// Waits without a deadline.
    pub fn wait(&self) -> WaitOutcome<V> {
        match self.rx.recv() {
            Ok(Ok(value)) => WaitOutcome::Ready(value),
            Ok(Err(kind)) => WaitOutcome::Failed(kind),
            Err(_) => WaitOutcome::Failed(FailureKind::Transient),
        }
    }
}

/// Counters describing cache behaviour since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered by a fresh value.
    pub hits: u64,
    /// Lookups that reserved a computation.
    pub misses: u64,
    /// Lookups that joined an in-flight computation.
    pub coalesced: u64,
    /// Lookups answered by a remembered failure.
    pub negative_hits: u64,
    /// Finished entries dropped to honour `max_entries`.
    pub evictions: u64,
    /// Entries found or purged past their expiry.
    pub expirations: u64,
    /// Entries currently stored, pending ones included.
    pub entries: usize,
}
