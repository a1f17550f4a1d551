//! Network: one ordering service plus members derived from a federation.

use serde::{Deserialize, Serialize};

use crate::custom_resource;
use crate::federation::{initiator_of, Member};
use crate::platform::OrdererSpec;
use crate::status::{CrStatus, StatusEnvelope, StatusType};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    pub federation: String,
    /// Cloned from the federation on create and never edited directly.
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub order_spec: OrdererSpec,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    #[serde(flatten)]
    pub cr: CrStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,
}

impl StatusEnvelope for NetworkStatus {
    fn envelope(&self) -> &CrStatus {
        &self.cr
    }

    fn envelope_mut(&mut self) -> &mut CrStatus {
        &mut self.cr
    }
}

custom_resource! {
    /// Ordering service owned by a federation.
    Network { spec: NetworkSpec, status: NetworkStatus, kind: "Network", plural: "networks", namespaced: false }
}

impl Network {
    /// The initiator member, whose namespace hosts the orderer.
    pub fn initiator(&self) -> Option<&Member> {
        initiator_of(&self.spec.members)
    }

    pub fn has_member(&self, org: &str) -> bool {
        self.spec.members.iter().any(|m| m.name == org)
    }

    pub fn status_type(&self) -> Option<StatusType> {
        self.status.as_ref().and_then(|s| s.cr.status_type)
    }

    pub fn is_dissolved(&self) -> bool {
        self.status_type() == Some(StatusType::Dissolved)
    }
}
