//! Federation: an agreement between organizations to form networks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::custom_resource;
use crate::status::{CrStatus, StatusEnvelope, StatusType};

/// Governance policy used to decide proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Policy {
    #[serde(rename = "ALL")]
    All,
    #[serde(rename = "ONE")]
    One,
    #[serde(rename = "MAJORITY")]
    Majority,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::All => f.write_str("ALL"),
            Policy::One => f.write_str("ONE"),
            Policy::Majority => f.write_str("MAJORITY"),
        }
    }
}

/// Membership entry shared by federations, networks and channels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub initiator: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub joined_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<DateTime<Utc>>,
}

impl Member {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            namespace: name.clone(),
            name,
            ..Default::default()
        }
    }

    pub fn initiator(name: impl Into<String>) -> Self {
        Self {
            initiator: true,
            ..Self::new(name)
        }
    }
}

/// Names of `members`.
pub fn member_names(members: &[Member]) -> BTreeSet<String> {
    members.iter().map(|m| m.name.clone()).collect()
}

/// The unique initiator, if exactly one member is flagged.
pub fn initiator_of(members: &[Member]) -> Option<&Member> {
    let mut initiators = members.iter().filter(|m| m.initiator);
    match (initiators.next(), initiators.next()) {
        (Some(m), None) => Some(m),
        _ => None,
    }
}

/// Members added and removed between two member lists, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberDelta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl MemberDelta {
    pub fn between(old: &[Member], new: &[Member]) -> Self {
        let old_names = member_names(old);
        let new_names = member_names(new);
        Self {
            added: new_names.difference(&old_names).cloned().collect(),
            removed: old_names.difference(&new_names).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Whether every name in `subset` appears in `superset`.
pub fn is_member_subset(subset: &[Member], superset: &[Member]) -> bool {
    let all = member_names(superset);
    subset.iter().all(|m| all.contains(&m.name))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederationSpec {
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederationStatus {
    #[serde(flatten)]
    pub cr: CrStatus,
    /// Networks formed under this federation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
}

impl StatusEnvelope for FederationStatus {
    fn envelope(&self) -> &CrStatus {
        &self.cr
    }

    fn envelope_mut(&mut self) -> &mut CrStatus {
        &mut self.cr
    }
}

custom_resource! {
    /// Agreement to form one or more blockchain networks.
    Federation { spec: FederationSpec, status: FederationStatus, kind: "Federation", plural: "federations", namespaced: false }
}

impl Federation {
    pub fn initiator(&self) -> Option<&Member> {
        initiator_of(&self.spec.members)
    }

    pub fn has_member(&self, org: &str) -> bool {
        self.spec.members.iter().any(|m| m.name == org)
    }

    pub fn status_type(&self) -> Option<StatusType> {
        self.status.as_ref().and_then(|s| s.cr.status_type)
    }
}

/// Name of the cluster-role and binding that expose a federation.
pub fn federation_role_name(federation: &str) -> String {
    format!("{}-blockchain:federation", federation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initiator_requires_uniqueness() {
        let members = vec![Member::initiator("org1"), Member::new("org2")];
        assert_eq!(initiator_of(&members).unwrap().name, "org1");

        let two = vec![Member::initiator("org1"), Member::initiator("org2")];
        assert!(initiator_of(&two).is_none());
        assert!(initiator_of(&[Member::new("org1")]).is_none());
    }

    #[test]
    fn test_member_delta() {
        let old = vec![Member::initiator("org1"), Member::new("org2")];
        let new = vec![Member::initiator("org1"), Member::new("org3")];
        let delta = MemberDelta::between(&old, &new);
        assert_eq!(delta.added, vec!["org3"]);
        assert_eq!(delta.removed, vec!["org2"]);
        assert!(MemberDelta::between(&old, &old).is_empty());
    }

    #[test]
    fn test_policy_wire_names() {
        let spec: FederationSpec = serde_json::from_value(serde_json::json!({
            "members": [{"name": "org1", "initiator": true}],
            "policy": "MAJORITY"
        }))
        .unwrap();
        assert_eq!(spec.policy, Some(Policy::Majority));
        assert!(spec.members[0].initiator);
        assert!(serde_json::from_value::<FederationSpec>(serde_json::json!({"policy": "SOME"})).is_err());
    }

    #[test]
    fn test_subset() {
        let fed = vec![Member::initiator("org1"), Member::new("org2")];
        assert!(is_member_subset(&[Member::new("org2")], &fed));
        assert!(!is_member_subset(&[Member::new("org3")], &fed));
    }
}
