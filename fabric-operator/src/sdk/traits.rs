//! The blockchain SDK seam.
//!
//! Channel administration, CA enrollment and the chaincode lifecycle calls are
//! performed by an external SDK. [`FabricSdk`] is the surface the reconcilers
//! drive; node addressing comes from the connection profiles stored next to
//! each peer and orderer.

use async_trait::async_trait;
use fabric_api::organization::CaRef;
use fabric_api::policy_dsl::SignaturePolicyEnvelope;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::SdkError;

/// Signing identity of an organization administrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub msp_id: String,
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

/// Result of enrolling against a CA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrollment {
    pub identity: Identity,
    pub ca_cert: Vec<u8>,
}

/// A peer or orderer node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// `<namespace>/<node>`
    pub node: String,
    pub url: String,
    #[serde(default)]
    pub tls_ca_pem: String,
}

/// Endorsement and validation plugin names used for every definition.
pub const ENDORSEMENT_PLUGIN: &str = "escc";
pub const VALIDATION_PLUGIN: &str = "vscc";

/// Chaincode definition approved and committed on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChaincodeDefinition {
    pub name: String,
    pub version: String,
    pub package_id: String,
    pub sequence: i64,
    pub endorsement_plugin: String,
    pub validation_plugin: String,
    pub init_required: bool,
    pub signature_policy: Option<SignaturePolicyEnvelope>,
}

/// Definition as it was approved or committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionState {
    pub version: String,
    pub sequence: i64,
    pub package_id: String,
}

#[async_trait]
pub trait FabricSdk: Send + Sync {
    /// Enroll `enroll_id` of organization `msp_id` against `ca`.
    async fn enroll(&self, ca: &CaRef, msp_id: &str, enroll_id: &str) -> Result<Enrollment, SdkError>;

    async fn create_channel(
        &self,
        channel: &str,
        members: &[String],
        orderer: &Endpoint,
        admin: &Identity,
    ) -> Result<(), SdkError>;

    async fn join_channel(
        &self,
        channel: &str,
        peer: &Endpoint,
        orderer: &Endpoint,
        admin: &Identity,
    ) -> Result<(), SdkError>;

    /// `SdkError::NotFound` when the package is not installed on `peer`.
    async fn lifecycle_query_installed(
        &self,
        peer: &Endpoint,
        admin: &Identity,
        package_id: &str,
    ) -> Result<(), SdkError>;

    /// Install a package, returning the package id the peer computed.
    async fn lifecycle_install(
        &self,
        peer: &Endpoint,
        admin: &Identity,
        label: &str,
        package: &[u8],
    ) -> Result<String, SdkError>;

    /// `SdkError::NotFound` when the admin's organization has not approved `name` at `sequence`.
    async fn lifecycle_query_approved(
        &self,
        channel: &str,
        name: &str,
        sequence: i64,
        peer: &Endpoint,
        admin: &Identity,
    ) -> Result<DefinitionState, SdkError>;

    async fn lifecycle_approve(
        &self,
        channel: &str,
        definition: &ChaincodeDefinition,
        peer: &Endpoint,
        orderer: &Endpoint,
        admin: &Identity,
    ) -> Result<(), SdkError>;

    /// Approval state per MSP id.
    async fn lifecycle_check_commit_readiness(
        &self,
        channel: &str,
        definition: &ChaincodeDefinition,
        peer: &Endpoint,
        admin: &Identity,
    ) -> Result<BTreeMap<String, bool>, SdkError>;

    /// `SdkError::NotFound` when nothing is committed under `name`.
    async fn lifecycle_query_committed(
        &self,
        channel: &str,
        name: &str,
        peer: &Endpoint,
        admin: &Identity,
    ) -> Result<DefinitionState, SdkError>;

    async fn lifecycle_commit(
        &self,
        channel: &str,
        definition: &ChaincodeDefinition,
        peers: &[Endpoint],
        orderer: &Endpoint,
        admin: &Identity,
    ) -> Result<(), SdkError>;
}
