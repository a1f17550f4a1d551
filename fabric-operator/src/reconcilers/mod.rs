//! Per-kind reconcilers.
//!
//! Each kind implements [`Reconciler`](crate::controller::Reconciler); the
//! shell in [`crate::controller`] drives them.

pub mod chaincode;
pub mod chaincode_build;
pub mod channel;
pub mod federation;
pub mod network;
pub mod organization;
pub mod proposal;
pub mod vote;

use fabric_api::{ErrorCode, ObjectMeta, Resource};
use std::sync::Arc;
use tracing::debug;

use crate::controller::{Context, Controller, Runnable};
use crate::error::{OperatorError, Result};
use crate::store::Api;

pub use chaincode::ChaincodeReconciler;
pub use chaincode_build::ChaincodeBuildReconciler;
pub use channel::ChannelReconciler;
pub use federation::FederationReconciler;
pub use network::NetworkReconciler;
pub use organization::OrganizationReconciler;
pub use proposal::ProposalReconciler;
pub use vote::VoteReconciler;

/// Create `desired` or bring the stored object in line with it. `merge`
/// copies the managed fields of `desired` into the stored object and says
/// whether anything changed.
pub async fn ensure<K, F>(
    api: &Api<K>,
    desired: K,
    merge: F,
    create_code: ErrorCode,
    update_code: ErrorCode,
) -> Result<K>
where
    K: Resource,
    F: FnOnce(&mut K, &K) -> bool,
{
    match api.get_opt(desired.name()).await? {
        None => match api.create(&desired).await {
            Ok(created) => {
                debug!(key = %desired.key(), "created");
                Ok(created)
            }
            Err(e) if e.is_already_exists() => Ok(api.get(desired.name()).await?),
            Err(e) => Err(OperatorError::from_store(e, create_code)),
        },
        Some(mut current) => {
            if !merge(&mut current, &desired) {
                return Ok(current);
            }
            let updated = api
                .update(&current)
                .await
                .map_err(|e| OperatorError::from_store(e, update_code))?;
            debug!(key = %updated.key(), "updated");
            Ok(updated)
        }
    }
}

/// Make `meta` carry an owner reference to `owner`. Returns whether it changed.
pub fn adopt<O: Resource>(meta: &mut ObjectMeta, owner: &O) -> bool {
    if meta.is_owned_by(O::KIND, owner.name()) {
        return false;
    }
    meta.owner_references.push(owner.controller_reference());
    true
}

/// Attach an owner reference on a stored object and refresh `obj`'s
/// resource version so the pass can keep writing it.
pub async fn adopt_stored<K: Resource, O: Resource>(api: &Api<K>, obj: &mut K, owner: &O) -> Result<()> {
    if !adopt(obj.meta_mut(), owner) {
        return Ok(());
    }
    let written = api.update(obj).await?;
    obj.meta_mut().resource_version = written.meta().resource_version.clone();
    Ok(())
}

/// One controller per reconciled kind.
pub fn controllers(ctx: &Context) -> Vec<Arc<dyn Runnable>> {
    vec![
        Arc::new(Controller::new(OrganizationReconciler, ctx.clone())),
        Arc::new(Controller::new(FederationReconciler, ctx.clone())),
        Arc::new(Controller::new(NetworkReconciler, ctx.clone())),
        Arc::new(Controller::new(ChannelReconciler, ctx.clone())),
        Arc::new(Controller::new(ChaincodeReconciler, ctx.clone())),
        Arc::new(Controller::new(ChaincodeBuildReconciler, ctx.clone())),
        Arc::new(Controller::new(ProposalReconciler, ctx.clone())),
        Arc::new(Controller::new(VoteReconciler, ctx.clone())),
    ]
}
