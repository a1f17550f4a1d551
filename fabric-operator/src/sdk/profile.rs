//! Node connection profiles and organization admin identities.
//!
//! Every peer and orderer node publishes `<node>-connection-profile` in its
//! namespace with a `profile.json` entry. Admin identities come from the
//! organization MSP secret.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use fabric_api::organization::msp_secret_name;
use fabric_api::platform::{ConfigMap, Orderer, Secret};
use fabric_api::{Network, ObjectMeta};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::traits::{Endpoint, Identity};
use crate::error::{OperatorError, Result};
use crate::store::{Api, ObjectStore};

pub const PROFILE_KEY: &str = "profile.json";

pub const ADMIN_CERT_KEY: &str = "admin-cert";
pub const ADMIN_KEY_KEY: &str = "admin-key";
pub const CA_CERT_KEY: &str = "ca-cert";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileEndpoints {
    pub api: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileTls {
    /// Base64 encoded PEM
    #[serde(default)]
    pub cert: String,
}

/// Contents of a node's `profile.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeProfile {
    pub endpoints: ProfileEndpoints,
    #[serde(default)]
    pub tls: ProfileTls,
}

impl NodeProfile {
    pub fn new(api: impl Into<String>, tls_pem: &str) -> Self {
        Self {
            endpoints: ProfileEndpoints { api: api.into() },
            tls: ProfileTls {
                cert: STANDARD.encode(tls_pem),
            },
        }
    }

    /// The config object a node publishes its profile in.
    pub fn config_map(&self, namespace: &str, node: &str) -> Result<ConfigMap> {
        let mut cm = ConfigMap {
            metadata: ObjectMeta::namespaced(namespace, node_profile_name(node)),
            ..Default::default()
        };
        cm.binary_data.insert(PROFILE_KEY.to_string(), serde_json::to_vec(self)?);
        Ok(cm)
    }
}

pub fn node_profile_name(node: &str) -> String {
    format!("{}-connection-profile", node)
}

/// Resolve the endpoint of `node` in `namespace` from its connection profile.
pub async fn node_endpoint(store: &Arc<dyn ObjectStore>, namespace: &str, node: &str) -> Result<Endpoint> {
    let cm = Api::<ConfigMap>::namespaced(Arc::clone(store), namespace)
        .get(&node_profile_name(node))
        .await?;
    let raw = cm.binary_data.get(PROFILE_KEY).ok_or_else(|| {
        OperatorError::InvalidState(format!("{}/{} has no {}", namespace, node_profile_name(node), PROFILE_KEY))
    })?;
    let profile: NodeProfile = serde_json::from_slice(raw)?;
    let pem = STANDARD
        .decode(profile.tls.cert.as_bytes())
        .map_err(|e| OperatorError::InvalidState(format!("tls cert of {}/{}: {}", namespace, node, e)))?;
    Ok(Endpoint {
        node: format!("{}/{}", namespace, node),
        url: profile.endpoints.api,
        tls_ca_pem: String::from_utf8_lossy(&pem).into_owned(),
    })
}

/// Endpoint of the first node of `network`'s orderer, which lives in the
/// initiator's namespace under the network's name.
pub async fn orderer_endpoint(store: &Arc<dyn ObjectStore>, network: &str) -> Result<Endpoint> {
    let net = Api::<Network>::all(Arc::clone(store)).get(network).await?;
    let initiator = net
        .initiator()
        .ok_or_else(|| OperatorError::InvalidState(format!("network {} has no initiator", network)))?;
    let namespace = if initiator.namespace.is_empty() {
        initiator.name.as_str()
    } else {
        initiator.namespace.as_str()
    };
    let orderer = Api::<Orderer>::namespaced(Arc::clone(store), namespace)
        .get(network)
        .await?;
    let node = orderer
        .node_names()
        .into_iter()
        .next()
        .ok_or_else(|| OperatorError::InvalidState(format!("orderer {} has no nodes", network)))?;
    node_endpoint(store, namespace, &node).await
}

/// Admin identity of organization `org` from its MSP secret.
pub async fn admin_identity(store: &Arc<dyn ObjectStore>, org: &str) -> Result<Identity> {
    let secret = Api::<Secret>::namespaced(Arc::clone(store), org)
        .get(&msp_secret_name(org))
        .await?;
    let field = |key: &str| {
        secret.data.get(key).cloned().ok_or_else(|| {
            OperatorError::InvalidState(format!("{} is missing {}", msp_secret_name(org), key))
        })
    };
    Ok(Identity {
        msp_id: org.to_string(),
        cert: field(ADMIN_CERT_KEY)?,
        key: field(ADMIN_KEY_KEY)?,
    })
}
