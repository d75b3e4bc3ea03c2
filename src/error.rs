//! Error types for the reconciliation engine.
//!
//! All errors are strongly typed using thiserror. Backend failures carry
//! their transient/permanent classification so the cache can pick the right
//! negative TTL, and the dispatcher can decide how loudly to log.

use thiserror::Error;

/// Errors raised by a [`BackendAdapter`](crate::backend::BackendAdapter).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum BackendError {
    /// Network, timeout or overload failure. Safe to retry later.
    #[error("Transient backend error: {message}")]
    Transient {
        message: String,
    },

    /// Malformed query or unsupported feature. Retrying will not help.
    #[error("Permanent backend error: {message}")]
    Permanent {
        message: String,
    },

    /// The adapter observed a cancellation signal and gave up.
    #[error("Backend call cancelled")]
    Cancelled,

    /// The adapter does not provide the requested capability.
    #[error("{capability} not implemented for {backend} backend")]
    NotImplemented {
        capability: String,
        backend: String,
    },
}

impl BackendError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a permanent error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Creates a not-implemented error for an optional capability.
    #[must_use]
    pub fn not_implemented(capability: impl Into<String>, backend: impl Into<String>) -> Self {
        Self::NotImplemented {
            capability: capability.into(),
            backend: backend.into(),
        }
    }

    /// Returns true if a later retry may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Cancelled)
    }

    /// Cache classification of this failure.
    #[must_use]
    pub const fn failure_kind(&self) -> FailureKind {
        if self.is_transient() {
            FailureKind::Transient
        } else {
            FailureKind::Permanent
        }
    }
}

/// How a failed computation is remembered by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Kept for the short negative TTL.
    Transient,
    /// Kept for the regular TTL.
    Permanent,
}

/// Validation errors for queries, requests and configuration.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ValidationError {
    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidField {
        field: String,
        reason: String,
    },

    #[error("Batch key cannot be empty")]
    EmptyBatchKey,

    #[error("Duplicate batch key '{key}'")]
    DuplicateBatchKey {
        key: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },

    #[error("Malformed request JSON: {reason}")]
    MalformedRequest {
        reason: String,
    },
}

/// Errors from the dispatcher machinery itself (never from a backend).
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum DispatchError {
    #[error("Worker pool queue is full (capacity {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Dispatcher has been shut down")]
    Shutdown,

    #[error("Failed to spawn worker thread: {message}")]
    Spawn {
        message: String,
    },
}

/// Top-level error type for the crate.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ReconcileError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl ReconcileError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a dispatch error.
    #[must_use]
    pub const fn is_dispatch(&self) -> bool {
        matches!(self, Self::Dispatch(_))
    }

    /// Returns true if this is a backend error.
    #[must_use]
    pub const fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Internal { .. } => false,
            Self::Dispatch(e) => matches!(e, DispatchError::QueueFull { .. }),
            Self::Backend(e) => e.is_transient(),
        }
    }
}

/// Result type alias for crate operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;
