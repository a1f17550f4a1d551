use async_trait::async_trait;
use fabric_api::federation::{is_member_subset, member_names};
use fabric_api::{Channel, NamespacedName, Network, Resource};
use std::collections::BTreeSet;

use super::errors::{AdmissionError, AdmissionResult};
use super::webhook::{Caller, Webhook};
use crate::controller::Context;

pub struct ChannelWebhook;

/// Every peer must sit in a member organization the caller administers.
async fn check_peers<'a>(
    ctx: &Context,
    caller: &Caller,
    channel: &Channel,
    peers: impl IntoIterator<Item = &'a NamespacedName>,
) -> AdmissionResult<()> {
    let mut owned: Option<BTreeSet<String>> = None;
    for peer in peers {
        if !channel.has_member(&peer.namespace) {
            return Err(AdmissionError::Invalid(format!(
                "peer {} does not belong to a member of channel {}",
                peer,
                channel.name()
            )));
        }
        if caller.super_user {
            continue;
        }
        if owned.is_none() {
            owned = Some(caller.administered(ctx).await?);
        }
        if !owned.as_ref().map(|o| o.contains(&peer.namespace)).unwrap_or(false) {
            return Err(AdmissionError::NoPermission(format!(
                "{} does not administer organization {} of peer {}",
                caller.name(),
                peer.namespace,
                peer
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl Webhook for ChannelWebhook {
    type Kind = Channel;

    async fn validate_create(&self, ctx: &Context, caller: &Caller, ch: &Channel) -> AdmissionResult<()> {
        let net = ctx
            .api::<Network>()
            .get_opt(&ch.spec.network)
            .await?
            .ok_or_else(|| AdmissionError::NotFound(format!("network {}", ch.spec.network)))?;
        if !is_member_subset(&ch.spec.members, &net.spec.members) {
            return Err(AdmissionError::Invalid(format!(
                "channel {} members must belong to network {}",
                ch.name(),
                net.name()
            )));
        }
        check_peers(ctx, caller, ch, &ch.spec.peers).await
    }

    async fn validate_update(&self, ctx: &Context, caller: &Caller, old: &Channel, new: &Channel) -> AdmissionResult<()> {
        if old.spec.network != new.spec.network {
            return Err(AdmissionError::Immutable("spec.network"));
        }
        if member_names(&old.spec.members) != member_names(&new.spec.members) {
            return Err(AdmissionError::UpdateChannelMember);
        }
        let before: BTreeSet<&NamespacedName> = old.spec.peers.iter().collect();
        let after: BTreeSet<&NamespacedName> = new.spec.peers.iter().collect();
        let changed: Vec<&NamespacedName> = before.symmetric_difference(&after).copied().collect();
        check_peers(ctx, caller, new, changed).await
    }

    async fn validate_delete(&self, _ctx: &Context, _caller: &Caller, ch: &Channel) -> AdmissionResult<()> {
        if !ch.spec.peers.is_empty() {
            return Err(AdmissionError::ChannelHasPeers(ch.name().to_string()));
        }
        Ok(())
    }
}
