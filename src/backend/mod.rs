//! Backend adapter contract.
//!
//! A backend is anything that can turn a [`Query`] into candidates: a search
//! index, a graph store, a REST API. The engine only knows this trait.
//! `resolve` is required; the other capabilities default to
//! [`BackendError::NotImplemented`] and are picked up when an adapter
//! overrides them.

pub mod memory;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::candidate::Candidate;
use crate::error::BackendError;
use crate::extend::{ColumnMetadata, PropertyRequest, Row};
use crate::query::Query;

pub use memory::{InMemoryBackend, Record};

/// Cooperative cancellation signal shared between a batch and its tasks.
///
/// Adapters doing long or repeated I/O should poll [`CancelToken::check`]
/// between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once [`cancel`](Self::cancel) was called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns `Err(BackendError::Cancelled)` once cancelled.
    pub fn check(&self) -> Result<(), BackendError> {
        if self.is_cancelled() {
            Err(BackendError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A property suggested for a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyProposal {
    /// Property id.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// An entity source.
///
/// Implementations must be safe to call from several worker threads at once.
pub trait BackendAdapter: Send + Sync {
    /// Human readable backend name, used in logs and errors.
    fn name(&self) -> &str;

    /// Resolves one query into unranked candidates.
    ///
    /// Scores should already be normalized to `[0.0, 1.0]`; the match policy
    /// clamps anything outside that range.
    fn resolve(&self, query: &Query, cancel: &CancelToken) -> Result<Vec<Candidate>, BackendError>;

    /// Fetches property values for one entity.
    fn extend(
        &self,
        _id: &str,
        _properties: &[PropertyRequest],
        _cancel: &CancelToken,
    ) -> Result<Row, BackendError> {
        Err(BackendError::not_implemented("extend", self.name()))
    }

    /// Describes the column produced for `property` by [`extend`](Self::extend).
    fn column_metadata(&self, _property: &PropertyRequest) -> Result<ColumnMetadata, BackendError> {
        Err(BackendError::not_implemented("column metadata", self.name()))
    }

    /// Suggests properties for a type.
    fn propose_properties(
        &self,
        _type_id: &str,
        _limit: usize,
    ) -> Result<Vec<PropertyProposal>, BackendError> {
        Err(BackendError::not_implemented("propose properties", self.name()))
    }
}

impl<T: BackendAdapter + ?Sized> BackendAdapter for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn resolve(&self, query: &Query, cancel: &CancelToken) -> Result<Vec<Candidate>, BackendError> {
        (**self).resolve(query, cancel)
    }

    fn extend(
        &self,
        id: &str,
        properties: &[PropertyRequest],
        cancel: &CancelToken,
    ) -> Result<Row, BackendError> {
        (**self).extend(id, properties, cancel)
    }

    fn column_metadata(&self, property: &PropertyRequest) -> Result<ColumnMetadata, BackendError> {
        (**self).column_metadata(property)
    }

    fn propose_properties(
        &self,
        type_id: &str,
        limit: usize,
    ) -> Result<Vec<PropertyProposal>, BackendError> {
        (**self).propose_properties(type_id, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ResolveOnly;

    impl BackendAdapter for ResolveOnly {
        fn name(&self) -> &str {
            "resolve-only"
        }

        fn resolve(&self, _query: &Query, _cancel: &CancelToken) -> Result<Vec<Candidate>, BackendError> {
            Ok(vec![Candidate::new("1", "one", 1.0)])
        }
    }

    #[test]
    fn optional_capabilities_default_to_not_implemented() {
        let backend = ResolveOnly;
        let cancel = CancelToken::new();

        let err = backend.extend("1", &[], &cancel).unwrap_err();
        assert!(matches!(err, BackendError::NotImplemented { .. }));
        assert!(format!("{err}").contains("resolve-only"));

        let err = backend
            .column_metadata(&PropertyRequest::new("p"))
            .unwrap_err();
        assert!(matches!(err, BackendError::NotImplemented { .. }));

        let err = backend.propose_properties("Person", 5).unwrap_err();
        assert!(matches!(err, BackendError::NotImplemented { .. }));
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());

        clone.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.check(), Err(BackendError::Cancelled));
    }

    #[test]
    fn arc_adapter_delegates() {
        let backend: Arc<dyn BackendAdapter> = Arc::new(ResolveOnly);
        let out = backend.resolve(&Query::text("x"), &CancelToken::new()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(BackendAdapter::name(&backend), "resolve-only");
    }
}
