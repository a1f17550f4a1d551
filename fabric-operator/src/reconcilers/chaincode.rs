//! Chaincode reconciler: labels, first status, then the lifecycle engine.

use async_trait::async_trait;
use fabric_api::labels::{
    operator_labels, CHAINCODE_CHANNEL, CHAINCODE_ENDORSEMENT_POLICY, CHAINCODE_ID, CHAINCODE_VERSION,
};
use fabric_api::status::StatusType;
use fabric_api::{Chaincode, ChaincodePhase, HasStatus, Resource};
use std::collections::BTreeMap;
use tracing::info;

use crate::chaincode::advance;
use crate::controller::{settle, Action, Context, Offering, Reconciler, Update};
use crate::error::Result;

pub struct ChaincodeReconciler;

#[async_trait]
impl Reconciler for ChaincodeReconciler {
    type Kind = Chaincode;

    fn labels(&self, ctx: &Context, cc: &Chaincode) -> BTreeMap<String, String> {
        let mut labels = operator_labels(&ctx.config.label_prefix, cc.name());
        labels.insert(CHAINCODE_CHANNEL.to_string(), cc.spec.channel.clone());
        labels.insert(CHAINCODE_ID.to_string(), cc.spec.id.clone());
        labels.insert(CHAINCODE_VERSION.to_string(), cc.spec.version.clone());
        labels.insert(
            CHAINCODE_ENDORSEMENT_POLICY.to_string(),
            cc.spec.endorse_policy_ref.name.clone(),
        );
        labels
    }

    /// Governance moves a chaincode by writing its phase, so phase changes
    /// count as well as spec changes.
    fn diff(&self, old: &Chaincode, new: &Chaincode) -> Update {
        Update {
            spec_updated: old.spec != new.spec,
            phase_updated: old.phase() != new.phase(),
            ..Default::default()
        }
    }

    async fn reconcile(&self, ctx: &Context, cc: &mut Chaincode, _update: Update) -> Result<Action> {
        if !cc.is_initialized() {
            let name = cc.name().to_string();
            let status = cc.status_or_default();
            settle(&mut status.cr, StatusType::Created, "ChaincodeCreated", "");
            info!(chaincode = %name, phase = %status.phase, "chaincode registered");
            if status.phase == ChaincodePhase::Pending {
                return Ok(Action::Done);
            }
        }
        advance(ctx, cc).await
    }
}
