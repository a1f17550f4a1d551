//! Organization: the administrative tenant.

use serde::{Deserialize, Serialize};

use crate::custom_resource;
use crate::status::{CrStatus, StatusEnvelope};

/// Reference to the certificate authority an organization enrolls against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaRef {
    pub name: String,
    /// `ca` or `tlsca`
    #[serde(default = "default_ca")]
    pub ca: String,
}

fn default_ca() -> String {
    "ca".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationSpec {
    /// Principal name of the organization administrator.
    pub admin: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_ref: Option<CaRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clients: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationStatus {
    #[serde(flatten)]
    pub cr: CrStatus,
    /// Federations this organization currently belongs to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub federations: Vec<String>,
}

impl StatusEnvelope for OrganizationStatus {
    fn envelope(&self) -> &CrStatus {
        &self.cr
    }

    fn envelope_mut(&mut self) -> &mut CrStatus {
        &mut self.cr
    }
}

custom_resource! {
    /// Administrative tenant. Owns the namespace of the same name.
    Organization { spec: OrganizationSpec, status: OrganizationStatus, kind: "Organization", plural: "organizations", namespaced: false }
}

impl Organization {
    /// The namespace owned by this organization.
    pub fn user_namespace(&self) -> &str {
        &self.metadata.name
    }

    /// MSP identifier used on-chain.
    pub fn msp_id(&self) -> &str {
        &self.metadata.name
    }

    pub fn is_errored(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| s.cr.is(crate::status::StatusType::Error))
            .unwrap_or(false)
    }
}

/// Name of the secret that holds the organization MSP material.
pub fn msp_secret_name(org: &str) -> String {
    format!("{}-msp-crypto", org)
}

pub const ADMIN_CLUSTER_ROLE_SUFFIX: &str = "blockchain:admin-clusterrole";
pub const CLIENT_CLUSTER_ROLE_SUFFIX: &str = "blockchain:client-clusterrole";

pub fn admin_cluster_role_name(org: &str) -> String {
    format!("{}-{}", org, ADMIN_CLUSTER_ROLE_SUFFIX)
}

pub fn client_cluster_role_name(org: &str) -> String {
    format!("{}-{}", org, CLIENT_CLUSTER_ROLE_SUFFIX)
}

pub fn admin_cluster_role_binding_name(org: &str) -> String {
    format!("{}-blockchain:admin-clusterrolebinding", org)
}

pub fn client_cluster_role_binding_name(org: &str) -> String {
    format!("{}-blockchain:client-clusterrolebinding", org)
}

pub fn admin_role_name(org: &str) -> String {
    format!("{}-blockchain:admin-role", org)
}

pub fn client_role_name(org: &str) -> String {
    format!("{}-blockchain:client-role", org)
}

pub fn admin_role_binding_name(org: &str) -> String {
    format!("{}-blockchain:admin-rolebinding", org)
}

pub fn client_role_binding_name(org: &str) -> String {
    format!("{}-blockchain:client-rolebinding", org)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::Resource;

    #[test]
    fn test_organization_roundtrips_with_flattened_status() {
        let json = serde_json::json!({
            "apiVersion": "ibp.com/v1beta1",
            "kind": "Organization",
            "metadata": {"name": "org1"},
            "spec": {"admin": "alice", "caRef": {"name": "org1"}},
            "status": {"type": "Created", "status": "True", "federations": ["fed1"]}
        });
        let org: Organization = serde_json::from_value(json).unwrap();
        assert_eq!(org.name(), "org1");
        assert_eq!(org.spec.ca_ref.as_ref().unwrap().ca, "ca");
        let status = org.status.as_ref().unwrap();
        assert!(status.cr.is(crate::status::StatusType::Created));
        assert_eq!(status.federations, vec!["fed1"]);
    }

    #[test]
    fn test_role_names() {
        assert_eq!(admin_cluster_role_name("org1"), "org1-blockchain:admin-clusterrole");
        assert_eq!(client_role_binding_name("org1"), "org1-blockchain:client-rolebinding");
    }
}
