use async_trait::async_trait;
use fabric_api::federation::is_member_subset;
use fabric_api::{Federation, Network, Resource, StatusType};

use super::errors::{AdmissionError, AdmissionResult};
use super::webhook::{Caller, Webhook};
use crate::controller::Context;

pub struct NetworkWebhook;

async fn check_federation(ctx: &Context, net: &Network) -> AdmissionResult<()> {
    let fed = ctx
        .api::<Federation>()
        .get_opt(&net.spec.federation)
        .await?
        .ok_or_else(|| AdmissionError::NotFound(format!("federation {}", net.spec.federation)))?;
    if fed.status_type() == Some(StatusType::Error) {
        return Err(AdmissionError::Invalid(format!("federation {} is in error", fed.name())));
    }
    if !is_member_subset(&net.spec.members, &fed.spec.members) {
        return Err(AdmissionError::Invalid(format!(
            "network {} members must belong to federation {}",
            net.name(),
            fed.name()
        )));
    }
    Ok(())
}

#[async_trait]
impl Webhook for NetworkWebhook {
    type Kind = Network;

    /// A network without members starts with its federation's.
    async fn default(&self, ctx: &Context, _caller: &Caller, net: &mut Network) -> AdmissionResult<()> {
        if !net.spec.members.is_empty() {
            return Ok(());
        }
        if let Some(fed) = ctx.api::<Federation>().get_opt(&net.spec.federation).await? {
            net.spec.members = fed.spec.members;
        }
        Ok(())
    }

    async fn validate_create(&self, ctx: &Context, _caller: &Caller, net: &Network) -> AdmissionResult<()> {
        check_federation(ctx, net).await
    }

    async fn validate_update(&self, ctx: &Context, _caller: &Caller, old: &Network, new: &Network) -> AdmissionResult<()> {
        if old.spec.federation != new.spec.federation {
            return Err(AdmissionError::Immutable("spec.federation"));
        }
        check_federation(ctx, new).await
    }

    async fn validate_delete(&self, _ctx: &Context, _caller: &Caller, net: &Network) -> AdmissionResult<()> {
        if !net.is_dissolved() {
            return Err(AdmissionError::Invalid(format!(
                "network {} can only be deleted once dissolved",
                net.name()
            )));
        }
        Ok(())
    }
}
