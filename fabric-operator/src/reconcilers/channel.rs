//! Channel reconciler.
//!
//! Creates the channel on the network's orderer, keeps the channel
//! connection profile in the operator namespace, and joins every declared
//! peer once its workload is available. Join outcomes are recorded per peer
//! and never fail the channel as a whole.

use async_trait::async_trait;
use fabric_api::channel::{connection_profile_name, ChannelStatus, PeerCondition};
use fabric_api::federation::MemberDelta;
use fabric_api::meta::NamespacedName;
use fabric_api::platform::{ConfigMap, Deployment};
use fabric_api::status::StatusType;
use fabric_api::{Channel, ErrorCode, HasStatus, Network, ObjectMeta, Resource};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{adopt_stored, ensure};
use crate::controller::{settle, Action, Context, Reconciler, Update};
use crate::error::{OperatorError, Result};
use crate::rbac::{RbacAction, Target};
use crate::sdk::{admin_identity, node_endpoint, orderer_endpoint, Endpoint, Identity};
use crate::store::Subresource;

/// Key of the serialized profile in the channel connection profile.
pub const PROFILE_YAML_KEY: &str = "profile.yaml";

pub struct ChannelReconciler;

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Pem {
    pem: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Client {
    organization: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
struct ChannelPeer {}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
struct ChannelSection {
    peers: BTreeMap<String, ChannelPeer>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct User {
    key: Pem,
    cert: Pem,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct OrgSection {
    mspid: String,
    peers: Vec<String>,
    users: BTreeMap<String, User>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct Node {
    url: String,
    #[serde(rename = "tlsCACerts")]
    tls_ca_certs: Pem,
}

impl From<&Endpoint> for Node {
    fn from(endpoint: &Endpoint) -> Self {
        Self {
            url: endpoint.url.clone(),
            tls_ca_certs: Pem {
                pem: endpoint.tls_ca_pem.clone(),
            },
        }
    }
}

/// Client connection profile for one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct ConnectionProfile {
    name: String,
    version: String,
    client: Client,
    channels: BTreeMap<String, ChannelSection>,
    organizations: BTreeMap<String, OrgSection>,
    orderers: BTreeMap<String, Node>,
    peers: BTreeMap<String, Node>,
}

/// Name a peer goes by inside the profile.
fn profile_peer_name(peer: &NamespacedName) -> String {
    format!("{}-{}", peer.namespace, peer.name)
}

fn user(identity: &Identity) -> User {
    User {
        key: Pem {
            pem: String::from_utf8_lossy(&identity.key).into_owned(),
        },
        cert: Pem {
            pem: String::from_utf8_lossy(&identity.cert).into_owned(),
        },
    }
}

impl ChannelReconciler {
    async fn create_channel(&self, ctx: &Context, ch: &Channel, net: &Network) -> Result<()> {
        let initiator = net
            .initiator()
            .ok_or_else(|| OperatorError::InvalidState(format!("network {} has no initiator", net.name())))?;
        let orderer = orderer_endpoint(&ctx.store, net.name()).await?;
        let admin = admin_identity(&ctx.store, &initiator.name).await?;
        let members: Vec<String> = ch.spec.members.iter().map(|m| m.name.clone()).collect();
        match ctx.sdk.create_channel(ch.name(), &members, &orderer, &admin).await {
            Ok(()) => {
                info!(channel = %ch.name(), "channel created");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                debug!(channel = %ch.name(), "channel already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn profile(&self, ctx: &Context, ch: &Channel, net: &Network) -> Result<ConnectionProfile> {
        let client = net
            .initiator()
            .map(|m| m.name.clone())
            .or_else(|| ch.spec.members.first().map(|m| m.name.clone()))
            .unwrap_or_default();

        let mut section = ChannelSection::default();
        let mut organizations = BTreeMap::new();
        let mut peers = BTreeMap::new();

        for member in &ch.spec.members {
            let mut users = BTreeMap::new();
            match admin_identity(&ctx.store, &member.name).await {
                Ok(identity) => {
                    users.insert("admin".to_string(), user(&identity));
                }
                Err(e) => warn!(channel = %ch.name(), member = %member.name, error = %e, "no admin identity for profile"),
            }
            let member_peers: Vec<&NamespacedName> =
                ch.spec.peers.iter().filter(|p| p.namespace == member.name).collect();
            for peer in &member_peers {
                match node_endpoint(&ctx.store, &peer.namespace, &peer.name).await {
                    Ok(endpoint) => {
                        section.peers.insert(profile_peer_name(peer), ChannelPeer {});
                        peers.insert(profile_peer_name(peer), Node::from(&endpoint));
                    }
                    Err(e) => warn!(channel = %ch.name(), peer = %peer, error = %e, "skipping peer without profile"),
                }
            }
            organizations.insert(
                member.name.clone(),
                OrgSection {
                    mspid: member.name.clone(),
                    peers: member_peers.iter().map(|p| profile_peer_name(p)).collect(),
                    users,
                },
            );
        }

        let mut orderers = BTreeMap::new();
        match orderer_endpoint(&ctx.store, net.name()).await {
            Ok(endpoint) => {
                orderers.insert(endpoint.node.replace('/', "-"), Node::from(&endpoint));
            }
            Err(e) => warn!(channel = %ch.name(), error = %e, "no orderer for profile"),
        }

        let mut channels = BTreeMap::new();
        channels.insert(ch.name().to_string(), section);
        Ok(ConnectionProfile {
            name: ch.name().to_string(),
            version: "1.0.0".to_string(),
            client: Client { organization: client },
            channels,
            organizations,
            orderers,
            peers,
        })
    }

    async fn ensure_profile(&self, ctx: &Context, ch: &Channel, net: &Network) -> Result<()> {
        let profile = self.profile(ctx, ch, net).await?;
        let mut cm = ConfigMap {
            metadata: ObjectMeta::namespaced(&ctx.config.operator_namespace, connection_profile_name(ch.name())),
            ..Default::default()
        };
        cm.metadata.labels = fabric_api::labels::operator_labels(&ctx.config.label_prefix, ch.name());
        cm.binary_data
            .insert(PROFILE_YAML_KEY.to_string(), serde_yaml::to_string(&profile)?.into_bytes());
        ensure(
            &ctx.namespaced::<ConfigMap>(&ctx.config.operator_namespace),
            cm,
            |cur, want| {
                if cur.binary_data == want.binary_data {
                    return false;
                }
                cur.binary_data = want.binary_data.clone();
                true
            },
            ErrorCode::InvalidConfigMapCreateRequest,
            ErrorCode::InvalidConfigMapUpdateRequest,
        )
        .await?;
        Ok(())
    }

    /// Poll the peer workload until it is available or the ceiling passes.
    async fn wait_ready(&self, ctx: &Context, peer: &NamespacedName) -> bool {
        let deployments = ctx.namespaced::<Deployment>(&peer.namespace);
        let interval = ctx.config.peer_poll_interval.max(Duration::from_millis(1));
        let poll = async {
            loop {
                match deployments.get_opt(&peer.name).await {
                    Ok(Some(d)) if d.is_available() => return,
                    Ok(_) => {}
                    Err(e) => debug!(peer = %peer, error = %e, "peer workload lookup failed"),
                }
                tokio::time::sleep(interval).await;
            }
        };
        tokio::time::timeout(ctx.config.peer_poll_timeout, poll).await.is_ok()
    }

    async fn join(&self, ctx: &Context, ch: &Channel, peer: &NamespacedName) -> PeerCondition {
        if !self.wait_ready(ctx, peer).await {
            return PeerCondition::error(peer.clone(), "timeout", format!("peer {} is not available", peer));
        }
        let attempt = async {
            let endpoint = node_endpoint(&ctx.store, &peer.namespace, &peer.name).await?;
            let orderer = orderer_endpoint(&ctx.store, &ch.spec.network).await?;
            let admin = admin_identity(&ctx.store, &peer.namespace).await?;
            Ok::<_, OperatorError>(ctx.sdk.join_channel(ch.name(), &endpoint, &orderer, &admin).await)
        };
        match attempt.await {
            Ok(Ok(())) => {
                info!(channel = %ch.name(), peer = %peer, "peer joined");
                PeerCondition::joined(peer.clone())
            }
            Ok(Err(e)) if e.is_already_exists() => PeerCondition::joined(peer.clone()),
            Ok(Err(e)) => {
                warn!(channel = %ch.name(), peer = %peer, error = %e, "peer join failed");
                PeerCondition::error(peer.clone(), "JoinFailed", e.to_string())
            }
            Err(e) => PeerCondition::error(peer.clone(), "JoinFailed", e.to_string()),
        }
    }

    /// Join every declared peer that is not joined yet. Returns whether
    /// any peer ended in error.
    async fn join_peers(&self, ctx: &Context, ch: &mut Channel) -> Result<bool> {
        let api = ctx.api::<Channel>();
        let mut failed = false;
        let peers = ch.spec.peers.clone();

        let status: &mut ChannelStatus = ch.status_or_default();
        let before = status.peer_conditions.len();
        status.peer_conditions.retain(|c| peers.contains(&c.peer));
        if status.peer_conditions.len() != before {
            debug!(channel = %ch.name(), "dropped conditions of removed peers");
        }

        for peer in &peers {
            if ch.status.as_ref().and_then(|s| s.peer_condition(peer)).map(|c| c.is_joined()).unwrap_or(false) {
                continue;
            }
            let condition = self.join(ctx, ch, peer).await;
            failed |= !condition.is_joined();
            let conditions = {
                let status = ch.status_or_default();
                status.upsert_peer_condition(condition);
                status.peer_conditions.clone()
            };
            let patch = json!({ "status": { "peerConditions": conditions } });
            let written = api.patch(ch.name(), Subresource::Status, patch).await?;
            ch.meta_mut().resource_version = written.meta().resource_version.clone();
        }
        Ok(failed)
    }
}

#[async_trait]
impl Reconciler for ChannelReconciler {
    type Kind = Channel;

    fn mirror_prefix(&self) -> Option<&'static str> {
        Some("chan")
    }

    fn diff(&self, old: &Channel, new: &Channel) -> Update {
        if old.spec == new.spec {
            return Update::default();
        }
        Update {
            spec_updated: true,
            member_updated: !MemberDelta::between(&old.spec.members, &new.spec.members).is_empty(),
            peers_updated: old.spec.peers != new.spec.peers,
            ..Default::default()
        }
    }

    async fn reconcile(&self, ctx: &Context, ch: &mut Channel, update: Update) -> Result<Action> {
        let net = ctx.api::<Network>().get(&ch.spec.network).await?;
        adopt_stored(&ctx.api::<Channel>(), ch, &net).await?;

        let created = ch.status.as_ref().map(|s| s.cr.is(StatusType::Created)).unwrap_or(false);
        if !created {
            self.create_channel(ctx, ch, &net).await?;
            settle(&mut ch.status_or_default().cr, StatusType::Created, "ChannelCreated", "");
        }

        if update.member_updated {
            ctx.rbac().reconcile(&Target::channel(ch), RbacAction::Update).await?;
        }

        let failed = self.join_peers(ctx, ch).await?;
        self.ensure_profile(ctx, ch, &net).await?;

        if failed {
            return Ok(Action::RequeueAfter(ctx.config.peer_poll_interval));
        }
        Ok(Action::Done)
    }

    async fn cleanup(&self, ctx: &Context, ch: &Channel) -> Result<()> {
        ctx.rbac().reconcile(&Target::channel(ch), RbacAction::Delete).await?;
        match ctx
            .namespaced::<ConfigMap>(&ctx.config.operator_namespace)
            .delete(&connection_profile_name(ch.name()))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Profile YAML as stored, for consumers and tests.
pub fn decode_profile(cm: &ConfigMap) -> Option<serde_yaml::Value> {
    cm.binary_data
        .get(PROFILE_YAML_KEY)
        .and_then(|raw| serde_yaml::from_slice(raw).ok())
}
