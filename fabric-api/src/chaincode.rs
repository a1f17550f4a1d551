//! Chaincode: a deployable smart-contract unit on a channel.
//!
//! The lifecycle engine records its progress in [`ConditionRing`], a bounded
//! deque of stage outcomes. [`ConditionRing::next_stage`] derives the resume
//! point from its tail.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::OnceLock;

use crate::custom_resource;
use crate::errors::ApiError;
use crate::meta::NamedRef;
use crate::status::{ConditionStatus, CrStatus, StatusEnvelope};

/// Maximum number of lifecycle conditions retained.
pub const CONDITION_CAPACITY: usize = 10;

/// Longest name the platform accepts for a pod.
const MAX_POD_NAME: usize = 63;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaincodeImage {
    pub name: String,
    pub digest: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pull_secret: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaincodeSpec {
    pub channel: String,
    pub id: String,
    pub version: String,
    pub label: String,
    #[serde(default)]
    pub init_required: bool,
    pub endorse_policy_ref: NamedRef,
    /// Name of the ChaincodeBuild that supplies the image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_builder: Option<String>,
    #[serde(default)]
    pub images: ChaincodeImage,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ChaincodeSpec {
    pub fn validate_label(&self) -> Result<(), ApiError> {
        validate_label(&self.label)
    }
}

fn label_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[[:alnum:]][[:alnum:]_.+-]*$").expect("static label pattern"))
}

/// Checks a package label against `^[[:alnum:]][[:alnum:]_.+-]*$`.
pub fn validate_label(label: &str) -> Result<(), ApiError> {
    if label_pattern().is_match(label) {
        Ok(())
    } else {
        Err(ApiError::InvalidLabel(label.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChaincodePhase {
    #[default]
    Pending,
    Approved,
    Unapproved,
    Running,
}

impl fmt::Display for ChaincodePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Lifecycle stage recorded in a chaincode condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChaincodeStage {
    Packaged,
    Installed,
    Approved,
    Committed,
    Running,
    Done,
    Error,
}

/// Canonical stage order. `Done` wraps to `Packaged`.
pub const STAGE_ORDER: [ChaincodeStage; 6] = [
    ChaincodeStage::Packaged,
    ChaincodeStage::Installed,
    ChaincodeStage::Approved,
    ChaincodeStage::Committed,
    ChaincodeStage::Running,
    ChaincodeStage::Done,
];

impl ChaincodeStage {
    /// Next stage in the canonical cycle. `Error` has no successor of its own.
    pub fn successor(self) -> Option<ChaincodeStage> {
        let pos = STAGE_ORDER.iter().position(|s| *s == self)?;
        Some(STAGE_ORDER[(pos + 1) % STAGE_ORDER.len()])
    }

    /// Reason written with a failed attempt at this stage.
    pub fn failure_reason(self) -> &'static str {
        match self {
            ChaincodeStage::Packaged => "PackageFailed",
            ChaincodeStage::Installed => "InstallFailed",
            ChaincodeStage::Approved => "ApproveFailed",
            ChaincodeStage::Committed => "CommitFailed",
            ChaincodeStage::Running => "RunningCheckFailed",
            ChaincodeStage::Done | ChaincodeStage::Error => "LifecycleFailed",
        }
    }
}

impl fmt::Display for ChaincodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaincodeCondition {
    #[serde(rename = "type")]
    pub stage: ChaincodeStage,
    pub status: ConditionStatus,
    pub last_transition_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Resume point, set on `Error` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_stage: Option<ChaincodeStage>,
}

impl ChaincodeCondition {
    pub fn success(stage: ChaincodeStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            status: ConditionStatus::True,
            last_transition_time: Utc::now(),
            reason: String::new(),
            message: message.into(),
            next_stage: None,
        }
    }

    /// Failure while attempting `failed`; the next pass resumes there.
    pub fn error(failed: ChaincodeStage, message: impl Into<String>) -> Self {
        Self {
            stage: ChaincodeStage::Error,
            status: ConditionStatus::False,
            last_transition_time: Utc::now(),
            reason: failed.failure_reason().to_string(),
            message: message.into(),
            next_stage: Some(failed),
        }
    }
}

/// Bounded deque of lifecycle conditions, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionRing(VecDeque<ChaincodeCondition>);

impl ConditionRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail, dropping the head once full.
    pub fn push(&mut self, condition: ChaincodeCondition) {
        if self.0.len() >= CONDITION_CAPACITY {
            self.0.pop_front();
        }
        self.0.push_back(condition);
    }

    pub fn last(&self) -> Option<&ChaincodeCondition> {
        self.0.back()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChaincodeCondition> {
        self.0.iter()
    }

    pub fn get(&self, index: usize) -> Option<&ChaincodeCondition> {
        self.0.get(index)
    }

    /// The stage the lifecycle engine should attempt next.
    pub fn next_stage(&self) -> ChaincodeStage {
        match self.last() {
            None => ChaincodeStage::Packaged,
            Some(last) if last.stage == ChaincodeStage::Error => {
                last.next_stage.unwrap_or(ChaincodeStage::Packaged)
            }
            Some(last) => last.stage.successor().unwrap_or(ChaincodeStage::Packaged),
        }
    }
}

/// An image the chaincode ran before an upgrade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaincodeHistory {
    pub version: String,
    #[serde(default)]
    pub images: ChaincodeImage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_builder: Option<String>,
    /// Sequence the image was committed at.
    #[serde(default = "default_sequence")]
    pub sequence: i64,
    /// Proposal that replaced the image.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub upgraded_by: String,
    pub upgrade_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaincodeStatus {
    #[serde(flatten)]
    pub cr: CrStatus,
    #[serde(default)]
    pub phase: ChaincodePhase,
    #[serde(default = "default_sequence")]
    pub sequence: i64,
    #[serde(default, skip_serializing_if = "ConditionRing::is_empty")]
    pub conditions: ConditionRing,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<ChaincodeHistory>,
}

fn default_sequence() -> i64 {
    1
}

impl Default for ChaincodeStatus {
    fn default() -> Self {
        Self {
            cr: CrStatus::default(),
            phase: ChaincodePhase::Pending,
            sequence: default_sequence(),
            conditions: ConditionRing::new(),
            history: Vec::new(),
        }
    }
}

impl StatusEnvelope for ChaincodeStatus {
    fn envelope(&self) -> &CrStatus {
        &self.cr
    }

    fn envelope_mut(&mut self) -> &mut CrStatus {
        &mut self.cr
    }
}

custom_resource! {
    /// Smart-contract unit deployed to one channel.
    Chaincode { spec: ChaincodeSpec, status: ChaincodeStatus, kind: "Chaincode", plural: "chaincodes", namespaced: false }
}

impl Chaincode {
    pub fn phase(&self) -> ChaincodePhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    pub fn sequence(&self) -> i64 {
        self.status.as_ref().map(|s| s.sequence).unwrap_or(1)
    }

    pub fn next_stage(&self) -> ChaincodeStage {
        self.status
            .as_ref()
            .map(|s| s.conditions.next_stage())
            .unwrap_or(ChaincodeStage::Packaged)
    }

    /// Whether `build` is used now or was used by a previous version.
    pub fn references_build(&self, build: &str) -> bool {
        if self.spec.external_builder.as_deref() == Some(build) {
            return true;
        }
        self.status
            .as_ref()
            .map(|s| s.history.iter().any(|h| h.external_builder.as_deref() == Some(build)))
            .unwrap_or(false)
    }
}

/// Name of the runner pod the peer starts for a package:
/// `cc-<msp><peer><package>` with invalid characters replaced, lowercased
/// and truncated to 63 characters.
pub fn pod_name(msp_id: &str, peer_id: &str, package_id: &str) -> String {
    let raw = format!("cc-{}-{}{}", msp_id, peer_id, package_id);
    let mut name: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    name.truncate(MAX_POD_NAME);
    name
}
