//! Channel: a sub-ledger of a network, with per-peer join conditions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::custom_resource;
use crate::federation::Member;
use crate::meta::NamespacedName;
use crate::status::{ConditionStatus, CrStatus, StatusEnvelope, StatusType};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSpec {
    pub network: String,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub peers: Vec<NamespacedName>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerConditionType {
    PeerJoined,
    PeerError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerCondition {
    #[serde(flatten)]
    pub peer: NamespacedName,
    #[serde(rename = "type")]
    pub condition_type: PeerConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl PeerCondition {
    pub fn joined(peer: NamespacedName) -> Self {
        Self {
            peer,
            condition_type: PeerConditionType::PeerJoined,
            status: ConditionStatus::True,
            last_transition_time: Some(Utc::now()),
            reason: String::new(),
            message: String::new(),
        }
    }

    pub fn error(peer: NamespacedName, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            peer,
            condition_type: PeerConditionType::PeerError,
            status: ConditionStatus::False,
            last_transition_time: Some(Utc::now()),
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn is_joined(&self) -> bool {
        self.condition_type == PeerConditionType::PeerJoined && self.status == ConditionStatus::True
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    #[serde(flatten)]
    pub cr: CrStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peer_conditions: Vec<PeerCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_status: Option<CrStatus>,
}

impl ChannelStatus {
    /// Insert or replace the condition for `condition.peer`.
    pub fn upsert_peer_condition(&mut self, condition: PeerCondition) {
        match self.peer_conditions.iter_mut().find(|c| c.peer == condition.peer) {
            Some(existing) => *existing = condition,
            None => self.peer_conditions.push(condition),
        }
    }

    pub fn peer_condition(&self, peer: &NamespacedName) -> Option<&PeerCondition> {
        self.peer_conditions.iter().find(|c| &c.peer == peer)
    }
}

impl StatusEnvelope for ChannelStatus {
    fn envelope(&self) -> &CrStatus {
        &self.cr
    }

    fn envelope_mut(&mut self) -> &mut CrStatus {
        &mut self.cr
    }
}

custom_resource! {
    /// Sub-ledger shared by a subset of a network's members.
    Channel { spec: ChannelSpec, status: ChannelStatus, kind: "Channel", plural: "channels", namespaced: false }
}

impl Channel {
    pub fn has_member(&self, org: &str) -> bool {
        self.spec.members.iter().any(|m| m.name == org)
    }

    /// Peers whose condition is `PeerJoined`.
    pub fn joined_peers(&self) -> Vec<NamespacedName> {
        self.status
            .as_ref()
            .map(|s| {
                s.peer_conditions
                    .iter()
                    .filter(|c| c.is_joined())
                    .map(|c| c.peer.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_archived(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.archived_status.as_ref())
            .map(|a| a.is(StatusType::Archived) && a.status == ConditionStatus::True)
            .unwrap_or(false)
    }
}

/// Name of the companion connection-profile config object.
pub fn connection_profile_name(channel: &str) -> String {
    format!("chan-{}-connection-profile", channel)
}
