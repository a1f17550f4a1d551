//! Status envelope and condition vocabulary shared by the offering kinds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse lifecycle state written to `status.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum StatusType {
    #[default]
    Pending,
    Deploying,
    Deployed,
    Created,
    Activated,
    Failed,
    Dissolved,
    Archived,
    Error,
}

impl StatusType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusType::Pending => "Pending",
            StatusType::Deploying => "Deploying",
            StatusType::Deployed => "Deployed",
            StatusType::Created => "Created",
            StatusType::Activated => "Activated",
            StatusType::Failed => "Failed",
            StatusType::Dissolved => "Dissolved",
            StatusType::Archived => "Archived",
            StatusType::Error => "Error",
        }
    }
}

impl fmt::Display for StatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state condition status as used by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// The common status envelope.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrStatus {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub status_type: Option<StatusType>,
    #[serde(default)]
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl CrStatus {
    pub fn new(status_type: StatusType, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status_type: Some(status_type),
            status: ConditionStatus::True,
            reason: reason.into(),
            message: message.into(),
            last_heartbeat_time: None,
            error_code: None,
            version: None,
        }
    }

    pub fn is(&self, status_type: StatusType) -> bool {
        self.status_type == Some(status_type)
    }

    /// Whether `type`, `reason` or `message` differ. Heartbeats are ignored.
    pub fn differs_from(&self, other: &CrStatus) -> bool {
        self.status_type != other.status_type
            || self.reason != other.reason
            || self.message != other.message
    }
}

/// Access to the envelope embedded in a kind's status.
pub trait StatusEnvelope {
    fn envelope(&self) -> &CrStatus;
    fn envelope_mut(&mut self) -> &mut CrStatus;

    fn status_type(&self) -> Option<StatusType> {
        self.envelope().status_type
    }
}

impl StatusEnvelope for CrStatus {
    fn envelope(&self) -> &CrStatus {
        self
    }

    fn envelope_mut(&mut self) -> &mut CrStatus {
        self
    }
}
