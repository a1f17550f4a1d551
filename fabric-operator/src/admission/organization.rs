use async_trait::async_trait;
use fabric_api::labels::LabelSelector;
use fabric_api::{Network, Organization, Resource};

use super::errors::{AdmissionError, AdmissionResult};
use super::webhook::{Caller, Webhook};
use crate::controller::Context;

pub struct OrganizationWebhook;

#[async_trait]
impl Webhook for OrganizationWebhook {
    type Kind = Organization;

    async fn validate_create(&self, _ctx: &Context, caller: &Caller, org: &Organization) -> AdmissionResult<()> {
        caller.require(&org.spec.admin, || format!("create organization {}", org.name()))
    }

    async fn validate_update(
        &self,
        _ctx: &Context,
        caller: &Caller,
        old: &Organization,
        _new: &Organization,
    ) -> AdmissionResult<()> {
        caller.require(&old.spec.admin, || format!("update organization {}", old.name()))
    }

    async fn validate_delete(&self, ctx: &Context, caller: &Caller, org: &Organization) -> AdmissionResult<()> {
        caller.require(&org.spec.admin, || format!("delete organization {}", org.name()))?;
        let networks = ctx.api::<Network>().list(&LabelSelector::everything()).await?;
        if let Some(net) = networks
            .iter()
            .find(|n| n.initiator().map(|m| m.name == org.name()).unwrap_or(false))
        {
            return Err(AdmissionError::HasNetwork(format!(
                "organization {} initiates network {}",
                org.name(),
                net.name()
            )));
        }
        Ok(())
    }
}
