//! Canonical label keys and the operator label set.

use std::collections::BTreeMap;

pub const CHAINCODE_CHANNEL: &str = "bestchains.chaincode.channel";
pub const CHAINCODE_ID: &str = "bestchains.chaincode.id";
pub const CHAINCODE_VERSION: &str = "bestchains.chaincode.version";
pub const CHAINCODE_DELETE_PROPOSAL: &str = "bestchains.chaincode.delete.proposal";
/// Misspelled on purpose: persisted objects and external tooling match on it.
pub const CHAINCODE_ENDORSEMENT_POLICY: &str = "bestchians.chaincode.endorsementpolicy";

pub const CHAINCODE_BUILD_NETWORK: &str = "bestchains.chaincodebuild.network";
pub const CHAINCODE_BUILD_ID: &str = "bestchains.chaincodebuild.id";
pub const CHAINCODE_BUILD_VERSION: &str = "bestchains.chaincodebuild.version";
pub const CHAINCODE_BUILD_INITIATOR: &str = "bestchains.chaincodebuild.initiator";

pub const FEDERATION_INITIATOR: &str = "bestchains.federation.initiator";
pub const ORGANIZATION_ADMIN: &str = "bestchains.organization.admin";

pub const VOTE_PROPOSAL: &str = "bestchains.vote.proposal";
pub const VOTE_ORGANIZATION: &str = "bestchains.vote.organization";

/// Labels every operator-managed object carries.
pub fn operator_labels(prefix: &str, instance: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), instance.to_string());
    labels.insert("creator".to_string(), prefix.to_string());
    labels.insert("release".to_string(), "operator".to_string());
    labels.insert("helm.sh/chart".to_string(), format!("ibm-{}", prefix));
    labels.insert("app.kubernetes.io/name".to_string(), prefix.to_string());
    labels.insert("app.kubernetes.io/instance".to_string(), format!("{}{}", prefix, instance));
    labels.insert("app.kubernetes.io/managed-by".to_string(), format!("{}-operator", prefix));
    labels
}

/// Whether every `(key, value)` of `wanted` is already present in `current`.
pub fn contains_all(current: &BTreeMap<String, String>, wanted: &BTreeMap<String, String>) -> bool {
    wanted.iter().all(|(k, v)| current.get(k) == Some(v))
}

/// Equality-based label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut match_labels = BTreeMap::new();
        match_labels.insert(key.into(), value.into());
        Self { match_labels }
    }

    pub fn and(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        contains_all(labels, &self.match_labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_labels_use_prefix() {
        let labels = operator_labels("fabric", "org1");
        assert_eq!(labels["app"], "org1");
        assert_eq!(labels["helm.sh/chart"], "ibm-fabric");
        assert_eq!(labels["release"], "operator");
        assert_eq!(labels["app.kubernetes.io/managed-by"], "fabric-operator");
    }

    #[test]
    fn test_selector_matches_subset() {
        let mut labels = BTreeMap::new();
        labels.insert("a".to_string(), "1".to_string());
        labels.insert("b".to_string(), "2".to_string());
        assert!(LabelSelector::eq("a", "1").matches(&labels));
        assert!(!LabelSelector::eq("a", "1").and("b", "3").matches(&labels));
        assert!(LabelSelector::everything().matches(&labels));
    }

    #[test]
    fn test_endorsement_policy_key_keeps_spelling() {
        assert_eq!(CHAINCODE_ENDORSEMENT_POLICY, "bestchians.chaincode.endorsementpolicy");
    }
}
