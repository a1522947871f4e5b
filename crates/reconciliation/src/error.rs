use thiserror::Error;

use lotledger_auth::AuthzError;
use lotledger_core::DomainError;
use lotledger_infra::{StoreError, TransactionError};

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Engine-level error surfaced to the presentation layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// A change would drive a bin negative; nothing was written.
    #[error("consistency error: {0}")]
    Consistency(String),

    /// More than one lot matches a sale line.
    #[error("ambiguous match: {0}")]
    AmbiguousMatch(String),

    /// The optimistic retry budget ran out.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// A lot or purchase line vanished between indexing and commit.
    #[error("reference missing: {0}")]
    ReferenceMissing(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// The caller cancelled the operation before it committed.
    #[error("operation cancelled before commit")]
    Cancelled,

    #[error("store error: {0}")]
    Store(StoreError),
}

impl ReconcileError {
    /// Worth retrying later (store trouble or contention), as opposed to a
    /// deterministic rejection.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReconcileError::ConcurrencyConflict(_)
                | ReconcileError::Store(StoreError::Conflict { .. } | StoreError::Poisoned)
        )
    }
}

impl From<DomainError> for ReconcileError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => ReconcileError::Validation(msg),
            DomainError::Consistency(msg) => ReconcileError::Consistency(msg),
            DomainError::InvalidTransition(msg) => ReconcileError::InvalidTransition(msg),
            DomainError::NotFound(msg) => ReconcileError::ReferenceMissing(msg),
            DomainError::Conflict(msg) => ReconcileError::ConcurrencyConflict(msg),
        }
    }
}

impl From<StoreError> for ReconcileError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::RetriesExhausted { .. } => ReconcileError::ConcurrencyConflict(value.to_string()),
            other => ReconcileError::Store(other),
        }
    }
}

impl From<AuthzError> for ReconcileError {
    fn from(value: AuthzError) -> Self {
        ReconcileError::PermissionDenied(value.to_string())
    }
}

impl TransactionError for ReconcileError {
    fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Store(StoreError::Conflict { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_retries_become_a_retryable_conflict() {
        let err = ReconcileError::from(StoreError::RetriesExhausted { attempts: 4 });
        assert!(matches!(err, ReconcileError::ConcurrencyConflict(_)));
        assert!(err.is_retryable());
        assert!(!err.is_conflict());
    }

    #[test]
    fn domain_rejections_are_not_retryable() {
        let err = ReconcileError::from(DomainError::consistency("bin A would go negative"));
        assert!(matches!(err, ReconcileError::Consistency(_)));
        assert!(!err.is_retryable());

        let missing = ReconcileError::from(DomainError::not_found("lot"));
        assert!(matches!(missing, ReconcileError::ReferenceMissing(_)));
    }
}
