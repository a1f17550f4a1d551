//! Network reconciler: one orderer in the initiator's namespace, created
//! once and never updated from here.

use async_trait::async_trait;
use fabric_api::federation::MemberDelta;
use fabric_api::labels::{operator_labels, LabelSelector};
use fabric_api::network::NetworkStatus;
use fabric_api::platform::Orderer;
use fabric_api::status::StatusType;
use fabric_api::{Channel, ErrorCode, Federation, HasStatus, Network, ObjectMeta, Resource};
use tracing::info;

use super::{adopt, adopt_stored};
use crate::controller::{settle, Action, Context, Reconciler, Update};
use crate::error::{OperatorError, Result};
use crate::rbac::{RbacAction, Target};

pub struct NetworkReconciler;

impl NetworkReconciler {
    /// Create the orderer when missing. An existing orderer whose spec
    /// differs is an update request, which is refused.
    async fn ensure_orderer(&self, ctx: &Context, net: &Network, namespace: &str) -> Result<()> {
        let orderers = ctx.namespaced::<Orderer>(namespace);
        match orderers.get_opt(net.name()).await? {
            Some(existing) if existing.spec == net.spec.order_spec => Ok(()),
            Some(_) => Err(OperatorError::breaking(
                ErrorCode::InvalidOrdererNodeUpdateRequest,
                format!("orderer {}/{} cannot be updated", namespace, net.name()),
            )),
            None => {
                let mut orderer = Orderer {
                    metadata: ObjectMeta::namespaced(namespace, net.name()),
                    spec: net.spec.order_spec.clone(),
                    status: None,
                };
                orderer.metadata.labels = operator_labels(&ctx.config.label_prefix, net.name());
                adopt(&mut orderer.metadata, net);
                match orderers.create(&orderer).await {
                    Ok(_) => {
                        info!(network = %net.name(), namespace, "orderer created");
                        Ok(())
                    }
                    Err(e) if e.is_already_exists() => Ok(()),
                    Err(e) => Err(OperatorError::from_store(e, ErrorCode::InvalidOrdererNodeCreateRequest)),
                }
            }
        }
    }
}

#[async_trait]
impl Reconciler for NetworkReconciler {
    type Kind = Network;

    fn mirror_prefix(&self) -> Option<&'static str> {
        Some("net")
    }

    fn diff(&self, old: &Network, new: &Network) -> Update {
        if old.spec == new.spec {
            return Update::default();
        }
        Update {
            spec_updated: true,
            member_updated: !MemberDelta::between(&old.spec.members, &new.spec.members).is_empty(),
            ..Default::default()
        }
    }

    async fn reconcile(&self, ctx: &Context, net: &mut Network, update: Update) -> Result<Action> {
        if net.is_dissolved() {
            return Ok(Action::Done);
        }

        let networks = ctx.api::<Network>();
        let federation = ctx.api::<Federation>().get(&net.spec.federation).await?;
        adopt_stored(&networks, net, &federation).await?;

        let initiator = net.initiator().cloned().ok_or_else(|| {
            OperatorError::breaking(
                ErrorCode::InvalidOrdererInitSpec,
                format!("network {} must have exactly one initiator", net.name()),
            )
        })?;
        let namespace = if initiator.namespace.is_empty() {
            initiator.name.clone()
        } else {
            initiator.namespace.clone()
        };
        if update.orderer_create || update.spec_updated {
            self.ensure_orderer(ctx, net, &namespace).await?;
        }

        if update.member_updated {
            ctx.rbac().reconcile(&Target::network(net), RbacAction::Update).await?;
        }

        let mut channels: Vec<String> = ctx
            .api::<Channel>()
            .list(&LabelSelector::everything())
            .await?
            .into_iter()
            .filter(|c| c.spec.network == net.name())
            .map(|c| c.name().to_string())
            .collect();
        channels.sort();

        let status: &mut NetworkStatus = net.status_or_default();
        status.channels = channels;
        settle(&mut status.cr, StatusType::Created, "NetworkCreated", "");
        Ok(Action::Done)
    }

    async fn cleanup(&self, ctx: &Context, net: &Network) -> Result<()> {
        ctx.rbac().reconcile(&Target::network(net), RbacAction::Delete).await
    }
}
