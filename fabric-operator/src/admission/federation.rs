use async_trait::async_trait;
use fabric_api::labels::LabelSelector;
use fabric_api::{Federation, Network, Organization, Resource, StatusType};

use super::errors::{AdmissionError, AdmissionResult};
use super::webhook::{Caller, Webhook};
use crate::controller::Context;

pub struct FederationWebhook;

#[async_trait]
impl Webhook for FederationWebhook {
    type Kind = Federation;

    async fn validate_create(&self, ctx: &Context, caller: &Caller, fed: &Federation) -> AdmissionResult<()> {
        let initiators: Vec<_> = fed.spec.members.iter().filter(|m| m.initiator).collect();
        if initiators.len() != 1 {
            return Err(AdmissionError::Invalid(format!(
                "federation {} needs exactly one initiator, found {}",
                fed.name(),
                initiators.len()
            )));
        }
        if fed.spec.policy.is_none() {
            return Err(AdmissionError::Invalid("federation policy is required".into()));
        }

        let orgs = ctx.api::<Organization>();
        for member in &fed.spec.members {
            let org = orgs
                .get_opt(&member.name)
                .await?
                .ok_or_else(|| AdmissionError::NotFound(format!("organization {}", member.name)))?;
            if org.is_errored() {
                return Err(AdmissionError::Invalid(format!("organization {} is in error", member.name)));
            }
            if member.initiator {
                caller.require(&org.spec.admin, || {
                    format!("create federation {} for {}", fed.name(), member.name)
                })?;
            }
        }
        Ok(())
    }

    async fn validate_update(
        &self,
        _ctx: &Context,
        _caller: &Caller,
        old: &Federation,
        new: &Federation,
    ) -> AdmissionResult<()> {
        if old.spec.policy != new.spec.policy {
            return Err(AdmissionError::Immutable("spec.policy"));
        }
        Ok(())
    }

    async fn validate_delete(&self, ctx: &Context, _caller: &Caller, fed: &Federation) -> AdmissionResult<()> {
        if !matches!(fed.status_type(), Some(StatusType::Failed | StatusType::Dissolved)) {
            return Err(AdmissionError::Invalid(format!(
                "federation {} can only be deleted once failed or dissolved",
                fed.name()
            )));
        }
        let networks = ctx.api::<Network>().list(&LabelSelector::everything()).await?;
        let owned: Vec<&str> = networks
            .iter()
            .filter(|n| n.spec.federation == fed.name())
            .map(|n| n.name())
            .collect();
        if !owned.is_empty() {
            return Err(AdmissionError::HasNetwork(format!(
                "federation {} still has networks {}",
                fed.name(),
                owned.join(",")
            )));
        }
        Ok(())
    }
}
