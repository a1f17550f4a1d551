//! Platform object shapes the control plane reads and writes: namespaces,
//! secrets, config objects, RBAC, workloads, volume claims, pipeline runs and
//! orderer custom resources.
//!
//! Only the fields the reconcilers touch are modelled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::impl_resource;
use crate::meta::ObjectMeta;

/// Base64 encoding for `BTreeMap<String, Vec<u8>>` fields (`data`, `binaryData`).
pub mod base64_map {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(map: &BTreeMap<String, Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        let encoded: BTreeMap<&String, String> =
            map.iter().map(|(k, v)| (k, STANDARD.encode(v))).collect();
        encoded.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
        let encoded = BTreeMap::<String, String>::deserialize(d)?;
        encoded
            .into_iter()
            .map(|(k, v)| STANDARD.decode(v).map(|b| (k, b)).map_err(D::Error::custom))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    #[serde(default)]
    pub metadata: ObjectMeta,
}
impl_resource!(Namespace, api_version = "v1", kind = "Namespace", plural = "namespaces", namespaced = false);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, with = "base64_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Vec<u8>>,
}
impl_resource!(Secret, api_version = "v1", kind = "Secret", plural = "secrets", namespaced = true);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMap {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    #[serde(default, with = "base64_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub binary_data: BTreeMap<String, Vec<u8>>,
}
impl_resource!(ConfigMap, api_version = "v1", kind = "ConfigMap", plural = "configmaps", namespaced = true);

/// One RBAC rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_names: Vec<String>,
    #[serde(default)]
    pub verbs: Vec<String>,
}

impl PolicyRule {
    pub fn new(api_group: &str, resource: &str, verbs: &[&str]) -> Self {
        Self {
            api_groups: vec![api_group.to_string()],
            resources: vec![resource.to_string()],
            resource_names: Vec::new(),
            verbs: verbs.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn with_names(mut self, names: &[&str]) -> Self {
        self.resource_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Identity used when deduplicating rules: resources followed by resource names.
    pub fn identity(&self) -> String {
        let mut parts = self.resources.clone();
        parts.extend(self.resource_names.iter().cloned());
        parts.concat()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Subject {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            kind: "User".to_string(),
            name: name.into(),
            api_group: Some("rbac.authorization.k8s.io".to_string()),
            namespace: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRef {
    pub api_group: String,
    pub kind: String,
    pub name: String,
}

impl RoleRef {
    pub fn cluster_role(name: impl Into<String>) -> Self {
        Self {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: name.into(),
        }
    }

    pub fn role(name: impl Into<String>) -> Self {
        Self {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterRole {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}
impl_resource!(ClusterRole, api_version = "rbac.authorization.k8s.io/v1", kind = "ClusterRole", plural = "clusterroles", namespaced = false);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRoleBinding {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    pub role_ref: RoleRef,
}
impl_resource!(ClusterRoleBinding, api_version = "rbac.authorization.k8s.io/v1", kind = "ClusterRoleBinding", plural = "clusterrolebindings", namespaced = false);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Role {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}
impl_resource!(Role, api_version = "rbac.authorization.k8s.io/v1", kind = "Role", plural = "roles", namespaced = true);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleBinding {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    pub role_ref: RoleRef,
}
impl_resource!(RoleBinding, api_version = "rbac.authorization.k8s.io/v1", kind = "RoleBinding", plural = "rolebindings", namespaced = true);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    #[serde(default)]
    pub replicas: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub available_replicas: i32,
}

/// Workload backing a peer node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: DeploymentSpec,
    #[serde(default)]
    pub status: Option<DeploymentStatus>,
}
impl_resource!(Deployment, api_version = "apps/v1", kind = "Deployment", plural = "deployments", namespaced = true);

impl Deployment {
    /// `available == desired` with at least one desired replica.
    pub fn is_available(&self) -> bool {
        let desired = self.spec.replicas.unwrap_or(1);
        match &self.status {
            Some(status) => desired > 0 && status.available_replicas == desired,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodStatus {
    #[serde(default)]
    pub phase: String,
}

/// Chaincode runner workload object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: Option<PodStatus>,
}
impl_resource!(Pod, api_version = "v1", kind = "Pod", plural = "pods", namespaced = true);

impl Pod {
    pub fn is_running(&self) -> bool {
        self.status.as_ref().map(|s| s.phase == "Running").unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimSpec {
    #[serde(default)]
    pub access_modes: Vec<String>,
    #[serde(default)]
    pub storage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistentVolumeClaim {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PersistentVolumeClaimSpec,
}
impl_resource!(PersistentVolumeClaim, api_version = "v1", kind = "PersistentVolumeClaim", plural = "persistentvolumeclaims", namespaced = true);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: String,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceBinding {
    pub name: String,
    pub persistent_volume_claim: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunSpec {
    pub pipeline_ref: String,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub workspaces: Vec<WorkspaceBinding>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunStatus {
    #[serde(default)]
    pub conditions: Vec<PipelineRunCondition>,
    #[serde(default)]
    pub pipeline_results: Vec<Param>,
}

/// Pipeline-engine run that builds a chaincode image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: PipelineRunSpec,
    #[serde(default)]
    pub status: Option<PipelineRunStatus>,
}
impl_resource!(PipelineRun, api_version = "tekton.dev/v1beta1", kind = "PipelineRun", plural = "pipelineruns", namespaced = true);

impl PipelineRun {
    /// Whether the `Succeeded` condition reports reason `Completed` and status `True`.
    pub fn is_completed(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| {
                s.conditions
                    .iter()
                    .any(|c| c.reason == "Completed" && c.status == "True")
            })
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdererSpec {
    #[serde(default = "default_orderer_type")]
    pub orderer_type: String,
    #[serde(default = "default_cluster_size")]
    pub cluster_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_ref: Option<crate::organization::CaRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_accepted: Option<bool>,
}

impl Default for OrdererSpec {
    fn default() -> Self {
        Self {
            orderer_type: default_orderer_type(),
            cluster_size: default_cluster_size(),
            version: None,
            ca_ref: None,
            license_accepted: None,
        }
    }
}

fn default_orderer_type() -> String {
    "etcdraft".to_string()
}

fn default_cluster_size() -> u32 {
    1
}

/// Ordering-service custom resource materialised by a network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Orderer {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: OrdererSpec,
    #[serde(default)]
    pub status: Option<crate::status::CrStatus>,
}
impl_resource!(Orderer, api_version = crate::meta::API_VERSION, kind = "IBPOrderer", plural = "ibporderers", namespaced = true);

impl Orderer {
    /// Names of the orderer nodes: `<orderer>node<i>` for `i` in `1..=clusterSize`.
    pub fn node_names(&self) -> Vec<String> {
        (1..=self.spec.cluster_size.max(1))
            .map(|i| format!("{}node{}", self.metadata.name, i))
            .collect()
    }
}
