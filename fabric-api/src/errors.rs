//! Schema-level errors and the stable error-code catalog surfaced as
//! `status.errorCode`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error types for schema helpers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Endorsement policy expression failed to parse
    #[error("invalid endorsement policy: {0}")]
    InvalidPolicy(String),

    /// Chaincode label does not match the allowed pattern
    #[error("invalid chaincode label {0:?}")]
    InvalidLabel(String),

    /// Object could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Breaking errors. A reconcile that fails with one of these writes the error
/// status and is not requeued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    InvalidDeploymentCreateRequest = 1,
    InvalidDeploymentUpdateRequest = 2,
    InvalidServiceCreateRequest = 3,
    InvalidServiceUpdateRequest = 4,
    InvalidPvcCreateRequest = 5,
    InvalidPvcUpdateRequest = 6,
    InvalidConfigMapCreateRequest = 7,
    InvalidConfigMapUpdateRequest = 8,
    InvalidServiceAccountCreateRequest = 9,
    InvalidServiceAccountUpdateRequest = 10,
    InvalidRoleCreateRequest = 11,
    InvalidRoleUpdateRequest = 12,
    InvalidRoleBindingCreateRequest = 13,
    InvalidRoleBindingUpdateRequest = 14,
    InvalidClusterRoleCreateRequest = 15,
    InvalidClusterRoleUpdateRequest = 16,
    InvalidClusterRoleBindingCreateRequest = 17,
    InvalidClusterRoleBindingUpdateRequest = 18,
    InvalidPeerInitSpec = 19,
    InvalidOrdererType = 20,
    InvalidOrdererInitSpec = 21,
    InvalidOrdererNodeCreateRequest = 22,
    InvalidOrdererNodeUpdateRequest = 23,
    CaInitializationFailed = 24,
    OrdererInitializationFailed = 25,
    PeerInitializationFailed = 26,
    OrganizationInitializationFailed = 27,
    FederationInitializationFailed = 28,
    MigrationFailed = 29,
    PeerMigrationFailed = 30,
    OrdererMigrationFailed = 31,
    CaMigrationFailed = 32,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Every catalog entry is breaking; this exists so callers read as intent.
    pub fn is_breaking(self) -> bool {
        true
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}
