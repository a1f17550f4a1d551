//! Error types for the operator.
//!
//! Each layer has its own enum; [`OperatorError`] is what a reconcile pass
//! returns and carries the breaking-error code written to `status.errorCode`.

use fabric_api::{ApiError, ErrorCode};

/// Object store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic concurrency check failed
    #[error("conflict: {0}")]
    Conflict(String),

    /// The store rejected the object shape
    #[error("invalid: {0}")]
    Invalid(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }
}

/// Blockchain SDK failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SdkError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Peer, orderer or CA could not be reached
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("request failed: {0}")]
    Failed(String),
}

impl SdkError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SdkError::NotFound(_))
    }

    /// Joins and channel creation report duplicates through the message text.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, SdkError::AlreadyExists(_)) || self.to_string().contains("already exists")
    }
}

/// Error returned from a reconcile pass.
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sdk(#[from] SdkError),

    #[error(transparent)]
    Api(#[from] ApiError),

    /// A breaking error: the status is written and the request is not requeued
    #[error("{code}: {message}")]
    Breaking { code: ErrorCode, message: String },

    /// The object is not in a state this pass can act on
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl OperatorError {
    pub fn breaking(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Breaking {
            code,
            message: message.into(),
        }
    }

    /// Map a store failure on a derived object to a catalog code when the
    /// store rejected the request itself. Transient failures stay retryable.
    pub fn from_store(err: StoreError, code: ErrorCode) -> Self {
        match err {
            StoreError::Invalid(message) => Self::breaking(code, message),
            other => Self::Store(other),
        }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Breaking { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_breaking(&self) -> bool {
        self.code().map(ErrorCode::is_breaking).unwrap_or(false)
    }
}

/// Result type alias for reconcile operations
pub type Result<T> = std::result::Result<T, OperatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_store_errors_become_breaking() {
        let err = OperatorError::from_store(
            StoreError::Invalid("bad rules".into()),
            ErrorCode::InvalidClusterRoleCreateRequest,
        );
        assert!(err.is_breaking());
        assert_eq!(err.code(), Some(ErrorCode::InvalidClusterRoleCreateRequest));

        let err = OperatorError::from_store(
            StoreError::Conflict("stale".into()),
            ErrorCode::InvalidClusterRoleCreateRequest,
        );
        assert!(!err.is_breaking());
    }

    #[test]
    fn test_sdk_already_exists_by_message() {
        assert!(SdkError::Failed("channel ch already exists".into()).is_already_exists());
        assert!(!SdkError::Failed("timeout".into()).is_already_exists());
    }
}
