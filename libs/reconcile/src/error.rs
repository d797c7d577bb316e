//! Error types for store access and reconciliation passes.

use thiserror::Error;

/// Errors returned by a [`Store`](crate::Store) implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The object does not exist (or no longer exists).
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// An object with the same name already exists.
    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    /// Conflict detected (concurrent modification).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other backend failure. Treated as transient.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns true if this error means the object is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Reconciliation errors.
///
/// Validation problems in a parent spec are never reported here; they end up
/// in the parent's status conditions instead.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The store failed in a way the caller should retry.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The parent spec could not be serialized for hashing.
    #[error("failed to encode spec: {0}")]
    Encode(#[from] serde_json::Error),

    /// Invalid reconciler configuration.
    #[error("invalid rotation policy: {0}")]
    InvalidPolicy(String),
}

impl ReconcileError {
    /// Returns true if the pass should be retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        let err = StoreError::NotFound {
            kind: "Instance",
            name: "web-abc-def".to_string(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Instance not found: web-abc-def");

        assert!(!StoreError::Backend("timeout".to_string()).is_not_found());
    }

    #[test]
    fn test_store_error_is_retryable() {
        let err: ReconcileError = StoreError::Conflict("stale status".to_string()).into();
        assert!(err.is_retryable());
        assert!(!ReconcileError::InvalidPolicy("negative".to_string()).is_retryable());

        let encode = serde_json::from_str::<u32>("x").unwrap_err();
        assert!(!ReconcileError::from(encode).is_retryable());
    }
}
