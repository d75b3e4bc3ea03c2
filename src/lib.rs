//! # reconcile - batched, cached entity reconciliation
//!
//! Reconciliation services answer "which entity in my source does this text
//! refer to?" for many queries at once. This crate is the engine between the
//! request decoder and a concrete entity source: it fans a batch out to a
//! [`BackendAdapter`] on a bounded worker pool, collapses identical queries
//! into one backend call through a single-flight [`ResultCache`], ranks the
//! candidates with a [`MatchPolicy`], and returns every key within one
//! batch deadline.
//!
//! ## Core Concepts
//!
//! - **Query**: immutable search text plus limit, type and property constraints
//! - **Fingerprint**: stable digest of everything that changes a query's answer
//! - **Candidate**: a proposed entity with a score in `[0, 1]` and a match flag
//! - **Batch**: caller-keyed queries resolved together; failures degrade per key
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use reconcile::{Batch, DispatcherConfig, InMemoryBackend, Query, QueryDispatcher, Record};
//!
//! # fn main() -> reconcile::ReconcileResult<()> {
//! let backend = InMemoryBackend::new("people").with_records([Record::new("1", "Ada Lovelace")]);
//! let dispatcher = QueryDispatcher::new(Arc::new(backend), DispatcherConfig::default())?;
//!
//! let batch = Batch::from_pairs([("q0", Query::text("ada lovelace"))])?;
//! let result = dispatcher.dispatch(batch)?;
//! assert!(result.get("q0").unwrap()[0].is_match);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod candidate;
pub mod clock;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod query;
pub mod similarity;

// Engine
pub mod backend;
pub mod cache;
pub mod dispatch;
pub mod extend;
pub mod policy;
pub mod request;

pub use backend::{BackendAdapter, CancelToken, InMemoryBackend, PropertyProposal, Record};
pub use cache::{CacheStats, Lookup, Reservation, ResultCache, WaitOutcome, Waiter};
pub use candidate::Candidate;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, DispatcherConfig, MatchConfig, PoolConfig};
pub use dispatch::{Batch, BatchId, BatchResult, BatchStats, QueryDispatcher};
pub use error::{
    BackendError, DispatchError, FailureKind, ReconcileError, ReconcileResult, ValidationError,
};
pub use extend::{Cell, ColumnMetadata, ExtensionRequest, ExtensionResponse, PropertyRequest, Row};
pub use fingerprint::QueryFingerprint;
pub use policy::{FilterType, MatchPolicy, Operator, PropertyFilter, Restrict};
pub use query::{PropertyConstraint, PropertyValue, Query, QueryBuilder, TypeRef, TypeStrictness};
pub use request::{decode_batch, decode_extension, decode_single, encode_batch, encode_extension};
pub use similarity::{JaroWinkler, SimilarityScorer};
