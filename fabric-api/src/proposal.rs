//! Proposal: a governance request decided by member votes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chaincode::ChaincodeImage;
use crate::custom_resource;
use crate::federation::Policy;
use crate::status::ConditionStatus;
use crate::vote::VotePhase;

/// Default voting window.
pub const DEFAULT_VOTING_HOURS: i64 = 24;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFederation {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddMember {
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteMember {
    pub member: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DissolveFederation {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DissolveNetwork {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveChannel {
    pub channel: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnarchiveChannel {
    pub channel: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployChaincode {
    pub chaincode: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeChaincode {
    pub chaincode: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<ChaincodeImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_builder: Option<String>,
}

/// Which intent a proposal carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    CreateFederation,
    AddMember,
    DeleteMember,
    DissolveFederation,
    DissolveNetwork,
    ArchiveChannel,
    UnarchiveChannel,
    DeployChaincode,
    UpgradeChaincode,
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Borrowed view of the single intent set on a proposal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Intent<'a> {
    CreateFederation,
    AddMember(&'a AddMember),
    DeleteMember(&'a DeleteMember),
    DissolveFederation,
    DissolveNetwork(&'a DissolveNetwork),
    ArchiveChannel(&'a ArchiveChannel),
    UnarchiveChannel(&'a UnarchiveChannel),
    DeployChaincode(&'a DeployChaincode),
    UpgradeChaincode(&'a UpgradeChaincode),
}

impl Intent<'_> {
    pub fn purpose(&self) -> Purpose {
        match self {
            Intent::CreateFederation => Purpose::CreateFederation,
            Intent::AddMember(_) => Purpose::AddMember,
            Intent::DeleteMember(_) => Purpose::DeleteMember,
            Intent::DissolveFederation => Purpose::DissolveFederation,
            Intent::DissolveNetwork(_) => Purpose::DissolveNetwork,
            Intent::ArchiveChannel(_) => Purpose::ArchiveChannel,
            Intent::UnarchiveChannel(_) => Purpose::UnarchiveChannel,
            Intent::DeployChaincode(_) => Purpose::DeployChaincode,
            Intent::UpgradeChaincode(_) => Purpose::UpgradeChaincode,
        }
    }

    /// Chaincode the intent targets, if any.
    pub fn chaincode(&self) -> Option<&str> {
        match self {
            Intent::DeployChaincode(d) => Some(&d.chaincode),
            Intent::UpgradeChaincode(u) => Some(&u.chaincode),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalSpec {
    pub federation: String,
    pub policy: Option<Policy>,
    #[serde(default)]
    pub initiator_organization: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_federation: Option<CreateFederation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_member: Option<AddMember>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_member: Option<DeleteMember>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dissolve_federation: Option<DissolveFederation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dissolve_network: Option<DissolveNetwork>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_channel: Option<ArchiveChannel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unarchive_channel: Option<UnarchiveChannel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_chaincode: Option<DeployChaincode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_chaincode: Option<UpgradeChaincode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ProposalSpec {
    /// Every intent that is set, in declaration order.
    pub fn intents(&self) -> Vec<Intent<'_>> {
        let mut out = Vec::new();
        if self.create_federation.is_some() {
            out.push(Intent::CreateFederation);
        }
        if let Some(v) = &self.add_member {
            out.push(Intent::AddMember(v));
        }
        if let Some(v) = &self.delete_member {
            out.push(Intent::DeleteMember(v));
        }
        if self.dissolve_federation.is_some() {
            out.push(Intent::DissolveFederation);
        }
        if let Some(v) = &self.dissolve_network {
            out.push(Intent::DissolveNetwork(v));
        }
        if let Some(v) = &self.archive_channel {
            out.push(Intent::ArchiveChannel(v));
        }
        if let Some(v) = &self.unarchive_channel {
            out.push(Intent::UnarchiveChannel(v));
        }
        if let Some(v) = &self.deploy_chaincode {
            out.push(Intent::DeployChaincode(v));
        }
        if let Some(v) = &self.upgrade_chaincode {
            out.push(Intent::UpgradeChaincode(v));
        }
        out
    }

    /// The intent, when exactly one is set.
    pub fn intent(&self) -> Option<Intent<'_>> {
        let intents = self.intents();
        match intents.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    pub fn purpose(&self) -> Option<Purpose> {
        self.intent().map(|i| i.purpose())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProposalPhase {
    #[default]
    Pending,
    Voting,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalConditionType {
    Initialized,
    Deployed,
    Succeeded,
    Failed,
    Expired,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalCondition {
    #[serde(rename = "type")]
    pub condition_type: ProposalConditionType,
    pub status: ConditionStatus,
    pub last_transition_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Mirror of one Vote object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRecord {
    pub organization: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub phase: VotePhase,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalStatus {
    #[serde(default)]
    pub phase: ProposalPhase,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ProposalCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub votes: Vec<VoteRecord>,
}

impl ProposalStatus {
    /// Set `condition_type`, replacing an existing entry of the same type.
    /// The transition time only moves when the status flips.
    pub fn set_condition(
        &mut self,
        condition_type: ProposalConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        let reason = reason.into();
        let message = message.into();
        match self.conditions.iter_mut().find(|c| c.condition_type == condition_type) {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = Utc::now();
                }
                existing.status = status;
                existing.reason = reason;
                existing.message = message;
            }
            None => self.conditions.push(ProposalCondition {
                condition_type,
                status,
                last_transition_time: Utc::now(),
                reason,
                message,
            }),
        }
    }

    /// Drop the entry of `condition_type`. Returns whether one was present.
    pub fn remove_condition(&mut self, condition_type: ProposalConditionType) -> bool {
        let before = self.conditions.len();
        self.conditions.retain(|c| c.condition_type != condition_type);
        self.conditions.len() != before
    }

    pub fn condition(&self, condition_type: ProposalConditionType) -> Option<&ProposalCondition> {
        self.conditions.iter().find(|c| c.condition_type == condition_type)
    }

    pub fn is_true(&self, condition_type: ProposalConditionType) -> bool {
        self.condition(condition_type)
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }
}

custom_resource! {
    /// Governance request against a federation.
    Proposal { spec: ProposalSpec, status: ProposalStatus, kind: "Proposal", plural: "proposals", namespaced: false }
}

impl Proposal {
    pub fn phase(&self) -> ProposalPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Whether the voting window closed before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.spec.end_at.map(|end| now >= end).unwrap_or(false)
    }

    /// Fill `startAt` and `endAt` when missing.
    pub fn apply_defaults(&mut self, now: DateTime<Utc>) {
        let start = *self.spec.start_at.get_or_insert(now);
        self.spec
            .end_at
            .get_or_insert(start + chrono::Duration::hours(DEFAULT_VOTING_HOURS));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_intent() {
        let spec: ProposalSpec = serde_json::from_value(serde_json::json!({
            "federation": "fed1",
            "policy": "MAJORITY",
            "addMember": {"members": ["org3"]}
        }))
        .unwrap();
        assert_eq!(spec.purpose(), Some(Purpose::AddMember));
        match spec.intent().unwrap() {
            Intent::AddMember(a) => assert_eq!(a.members, vec!["org3"]),
            other => panic!("unexpected intent {:?}", other),
        }
    }

    #[test]
    fn test_no_or_multiple_intents() {
        let mut spec = ProposalSpec::default();
        assert!(spec.intent().is_none());
        spec.create_federation = Some(CreateFederation {});
        spec.dissolve_federation = Some(DissolveFederation {});
        assert!(spec.intent().is_none());
        assert_eq!(spec.intents().len(), 2);
    }

    #[test]
    fn test_defaults_window() {
        let now = Utc::now();
        let mut p = Proposal::new("p1", ProposalSpec::default());
        p.apply_defaults(now);
        assert_eq!(p.spec.start_at, Some(now));
        assert_eq!(p.spec.end_at, Some(now + chrono::Duration::hours(24)));
        assert!(!p.is_expired(now));
        assert!(p.is_expired(now + chrono::Duration::hours(25)));
    }

    #[test]
    fn test_zero_window_expires_immediately() {
        let now = Utc::now();
        let mut p = Proposal::new("p1", ProposalSpec::default());
        p.spec.start_at = Some(now);
        p.spec.end_at = Some(now);
        assert!(p.is_expired(now));
    }

    #[test]
    fn test_set_condition_upserts() {
        let mut status = ProposalStatus::default();
        status.set_condition(ProposalConditionType::Deployed, ConditionStatus::False, "", "");
        status.set_condition(ProposalConditionType::Deployed, ConditionStatus::True, "AllDeployed", "");
        assert_eq!(status.conditions.len(), 1);
        assert!(status.is_true(ProposalConditionType::Deployed));
        assert!(!status.is_true(ProposalConditionType::Succeeded));
    }
}
