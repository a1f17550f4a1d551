//! EndorsePolicy: a named signature policy bound to a channel.

use serde::{Deserialize, Serialize};

use crate::custom_resource;
use crate::errors::ApiError;
use crate::policy_dsl::{self, SignaturePolicyEnvelope};
use crate::status::{CrStatus, StatusEnvelope};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndorsePolicySpec {
    pub channel: String,
    /// Policy DSL, e.g. `AND('org1.member', 'org2.member')`.
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndorsePolicyStatus {
    #[serde(flatten)]
    pub cr: CrStatus,
}

impl StatusEnvelope for EndorsePolicyStatus {
    fn envelope(&self) -> &CrStatus {
        &self.cr
    }

    fn envelope_mut(&mut self) -> &mut CrStatus {
        &mut self.cr
    }
}

custom_resource! {
    EndorsePolicy { spec: EndorsePolicySpec, status: EndorsePolicyStatus, kind: "EndorsePolicy", plural: "endorsepolicies", namespaced: false }
}

impl EndorsePolicy {
    pub fn signature_policy(&self) -> Result<SignaturePolicyEnvelope, ApiError> {
        policy_dsl::parse(&self.spec.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_policy() {
        let ep = EndorsePolicy::new(
            "ep",
            EndorsePolicySpec {
                channel: "ch".into(),
                value: "OR('org1.member','org2.member')".into(),
                description: String::new(),
            },
        );
        assert_eq!(ep.signature_policy().unwrap().identities.len(), 2);
    }
}
