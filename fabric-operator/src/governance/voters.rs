//! Who votes on a proposal, and who gets to read it.

use fabric_api::federation::member_names;
use fabric_api::proposal::Intent;
use fabric_api::{Chaincode, Channel, Federation, Network, Proposal};
use std::collections::BTreeSet;

use crate::controller::Context;
use crate::error::{OperatorError, Result};

/// Organizations that vote on `proposal`, sorted.
pub async fn voters(ctx: &Context, proposal: &Proposal) -> Result<Vec<String>> {
    let intent = proposal.spec.intent().ok_or_else(|| {
        OperatorError::InvalidState(format!("proposal {} must carry exactly one intent", proposal.metadata.name))
    })?;
    let federation_members = || async {
        let fed = ctx.api::<Federation>().get(&proposal.spec.federation).await?;
        Ok::<_, OperatorError>(member_names(&fed.spec.members))
    };
    let channel_members = |channel: String| async move {
        let ch = ctx.api::<Channel>().get(&channel).await?;
        Ok::<_, OperatorError>(member_names(&ch.spec.members))
    };
    let chaincode_channel = |chaincode: String| async move {
        let cc = ctx.api::<Chaincode>().get(&chaincode).await?;
        Ok::<_, OperatorError>(cc.spec.channel)
    };

    let set: BTreeSet<String> = match intent {
        Intent::CreateFederation | Intent::DissolveFederation | Intent::AddMember(_) => {
            federation_members().await?
        }
        Intent::DeleteMember(d) => {
            let mut set = federation_members().await?;
            set.remove(&d.member);
            set
        }
        Intent::DissolveNetwork(d) => {
            let net = ctx.api::<Network>().get(&d.name).await?;
            member_names(&net.spec.members)
        }
        Intent::ArchiveChannel(a) => channel_members(a.channel.clone()).await?,
        Intent::UnarchiveChannel(u) => channel_members(u.channel.clone()).await?,
        Intent::DeployChaincode(_) | Intent::UpgradeChaincode(_) => {
            let chaincode = intent.chaincode().unwrap_or_default().to_string();
            let channel = chaincode_channel(chaincode).await?;
            channel_members(channel).await?
        }
    };
    Ok(set.into_iter().collect())
}

/// Organizations whose admins may read `proposal`: the voters, plus the
/// joining organizations of an AddMember.
pub async fn candidates(ctx: &Context, proposal: &Proposal) -> Result<BTreeSet<String>> {
    let mut set: BTreeSet<String> = voters(ctx, proposal).await?.into_iter().collect();
    if let Some(Intent::AddMember(add)) = proposal.spec.intent() {
        set.extend(add.members.iter().cloned());
    }
    Ok(set)
}
