//! Applying a decided proposal to the objects it governs.
//!
//! Every write is a compare-and-swap read-modify-write, so a concurrent
//! reconcile of the target surfaces as a conflict and the proposal retries.

use chrono::Utc;
use fabric_api::chaincode::{ChaincodeCondition, ChaincodeHistory};
use fabric_api::labels::{LabelSelector, CHAINCODE_DELETE_PROPOSAL};
use fabric_api::proposal::{Intent, UpgradeChaincode};
use fabric_api::status::{ConditionStatus, CrStatus, StatusType};
use fabric_api::{
    Chaincode, ChaincodePhase, ChaincodeStage, Channel, Federation, HasStatus, Member, Network, Proposal, Resource,
};
use tracing::info;

use super::policy::Verdict;
use crate::controller::{settle, Context};
use crate::error::{OperatorError, Result};

/// Apply the effect of `proposal` for `verdict`. Pending verdicts have no
/// effect.
pub async fn apply(ctx: &Context, proposal: &Proposal, verdict: Verdict) -> Result<()> {
    let Some(intent) = proposal.spec.intent() else {
        return Err(OperatorError::InvalidState(format!(
            "proposal {} must carry exactly one intent",
            proposal.name()
        )));
    };
    info!(proposal = %proposal.name(), purpose = %intent.purpose(), %verdict, "applying proposal");
    match verdict {
        Verdict::Approved => approve(ctx, proposal, intent).await,
        Verdict::Rejected => reject(ctx, proposal, intent).await,
        Verdict::Pending => Ok(()),
    }
}

async fn approve(ctx: &Context, proposal: &Proposal, intent: Intent<'_>) -> Result<()> {
    let federation = proposal.spec.federation.as_str();
    match intent {
        Intent::CreateFederation => {
            federation_status(ctx, federation, StatusType::Activated, "FederationActivated").await
        }
        Intent::AddMember(add) => {
            let now = Utc::now();
            ctx.api::<Federation>()
                .modify(federation, ctx.config.status_patch_retries, |fed| {
                    let mut changed = false;
                    for name in &add.members {
                        if fed.has_member(name) {
                            continue;
                        }
                        fed.spec.members.push(Member {
                            joined_by: proposal.name().to_string(),
                            joined_at: Some(now),
                            ..Member::new(name.as_str())
                        });
                        changed = true;
                    }
                    changed
                })
                .await?;
            Ok(())
        }
        Intent::DeleteMember(delete) => delete_member(ctx, federation, &delete.member).await,
        Intent::DissolveFederation => {
            federation_status(ctx, federation, StatusType::Dissolved, "FederationDissolved").await
        }
        Intent::DissolveNetwork(dissolve) => {
            ctx.api::<Network>()
                .modify_status(&dissolve.name, ctx.config.status_patch_retries, |net| {
                    if net.is_dissolved() {
                        return false;
                    }
                    settle(&mut net.status_or_default().cr, StatusType::Dissolved, "NetworkDissolved", "");
                    true
                })
                .await?;
            Ok(())
        }
        Intent::ArchiveChannel(archive) => archive_channel(ctx, &archive.channel, true).await,
        Intent::UnarchiveChannel(unarchive) => archive_channel(ctx, &unarchive.channel, false).await,
        Intent::DeployChaincode(deploy) => {
            ctx.api::<Chaincode>()
                .modify_status(&deploy.chaincode, ctx.config.status_patch_retries, |cc| {
                    match cc.phase() {
                        ChaincodePhase::Pending => {
                            cc.status_or_default().phase = ChaincodePhase::Approved;
                            true
                        }
                        _ => false,
                    }
                })
                .await?;
            Ok(())
        }
        Intent::UpgradeChaincode(upgrade) => upgrade_chaincode(ctx, proposal.name(), upgrade).await,
    }
}

async fn reject(ctx: &Context, proposal: &Proposal, intent: Intent<'_>) -> Result<()> {
    match intent {
        Intent::CreateFederation => {
            federation_status(ctx, &proposal.spec.federation, StatusType::Failed, "FederationFailed").await
        }
        Intent::DeployChaincode(_) | Intent::UpgradeChaincode(_) => {
            let Some(name) = intent.chaincode() else {
                return Ok(());
            };
            let chaincodes = ctx.api::<Chaincode>();
            chaincodes
                .modify(name, ctx.config.status_patch_retries, |cc| {
                    if cc.labels().get(CHAINCODE_DELETE_PROPOSAL).map(String::as_str) == Some(proposal.name()) {
                        return false;
                    }
                    cc.meta_mut()
                        .labels
                        .insert(CHAINCODE_DELETE_PROPOSAL.to_string(), proposal.name().to_string());
                    true
                })
                .await?;
            chaincodes
                .modify_status(name, ctx.config.status_patch_retries, |cc| {
                    if cc.phase() == ChaincodePhase::Unapproved {
                        return false;
                    }
                    cc.status_or_default().phase = ChaincodePhase::Unapproved;
                    true
                })
                .await?;
            Ok(())
        }
        _ => Ok(()),
    }
}

async fn federation_status(ctx: &Context, name: &str, status_type: StatusType, reason: &str) -> Result<()> {
    ctx.api::<Federation>()
        .modify_status(name, ctx.config.status_patch_retries, |fed| {
            if fed.status_type() == Some(status_type) {
                return false;
            }
            settle(&mut fed.status_or_default().cr, status_type, reason, "");
            true
        })
        .await?;
    Ok(())
}

/// Remove `member` from the federation, its networks and their channels,
/// dropping the member's peers from those channels. Refused while the
/// member initiates any of those networks.
async fn delete_member(ctx: &Context, federation: &str, member: &str) -> Result<()> {
    let networks: Vec<Network> = ctx
        .api::<Network>()
        .list(&LabelSelector::everything())
        .await?
        .into_iter()
        .filter(|n| n.spec.federation == federation)
        .collect();
    if let Some(net) = networks
        .iter()
        .find(|n| n.initiator().map(|i| i.name == member).unwrap_or(false))
    {
        return Err(OperatorError::InvalidState(format!(
            "{} initiates network {} and cannot leave federation {}",
            member,
            net.name(),
            federation
        )));
    }

    let retries = ctx.config.status_patch_retries;
    let channels: Vec<Channel> = ctx
        .api::<Channel>()
        .list(&LabelSelector::everything())
        .await?
        .into_iter()
        .filter(|c| networks.iter().any(|n| n.name() == c.spec.network))
        .filter(|c| c.spec.members.iter().any(|m| m.name == member) || c.spec.peers.iter().any(|p| p.namespace == member))
        .collect();
    for ch in &channels {
        ctx.api::<Channel>()
            .modify(ch.name(), retries, |c| {
                let before = (c.spec.members.len(), c.spec.peers.len());
                c.spec.members.retain(|m| m.name != member);
                c.spec.peers.retain(|p| p.namespace != member);
                (c.spec.members.len(), c.spec.peers.len()) != before
            })
            .await?;
    }
    for net in networks.iter().filter(|n| n.has_member(member)) {
        ctx.api::<Network>()
            .modify(net.name(), retries, |n| {
                let before = n.spec.members.len();
                n.spec.members.retain(|m| m.name != member);
                n.spec.members.len() != before
            })
            .await?;
    }
    ctx.api::<Federation>()
        .modify(federation, retries, |fed| {
            let before = fed.spec.members.len();
            fed.spec.members.retain(|m| m.name != member);
            fed.spec.members.len() != before
        })
        .await?;
    Ok(())
}

async fn archive_channel(ctx: &Context, channel: &str, archive: bool) -> Result<()> {
    ctx.api::<Channel>()
        .modify_status(channel, ctx.config.status_patch_retries, |ch| {
            if ch.is_archived() == archive {
                return false;
            }
            let (reason, status) = if archive {
                ("ChannelArchived", ConditionStatus::True)
            } else {
                ("ChannelUnarchived", ConditionStatus::False)
            };
            let mut envelope = CrStatus::new(StatusType::Archived, reason, "");
            envelope.status = status;
            ch.status_or_default().archived_status = Some(envelope);
            true
        })
        .await?;
    Ok(())
}

/// Move the running image into history, switch the spec to the new image
/// and restart the lifecycle at the next sequence.
///
/// The three writes are keyed on the history entry `proposal` leaves
/// behind, so a retry after a partial failure resumes where it stopped.
async fn upgrade_chaincode(ctx: &Context, proposal: &str, upgrade: &UpgradeChaincode) -> Result<()> {
    let chaincodes = ctx.api::<Chaincode>();
    let retries = ctx.config.status_patch_retries;

    let cc = chaincodes
        .modify_status(&upgrade.chaincode, retries, |cc| {
            if upgrade_entry(cc, proposal).is_some() {
                return false;
            }
            let previous = ChaincodeHistory {
                version: cc.spec.version.clone(),
                images: cc.spec.images.clone(),
                external_builder: cc.spec.external_builder.clone(),
                sequence: cc.sequence(),
                upgraded_by: proposal.to_string(),
                upgrade_time: Utc::now(),
            };
            cc.status_or_default().history.push(previous);
            true
        })
        .await?;
    let Some(from) = upgrade_entry(&cc, proposal).map(|h| h.sequence) else {
        return Err(OperatorError::InvalidState(format!(
            "chaincode {} lost the history entry of {}",
            upgrade.chaincode, proposal
        )));
    };

    chaincodes
        .modify(&upgrade.chaincode, retries, |cc| {
            let before = cc.spec.clone();
            cc.spec.version = upgrade.version.clone();
            if let Some(images) = &upgrade.images {
                cc.spec.images = images.clone();
            }
            if upgrade.external_builder.is_some() {
                cc.spec.external_builder = upgrade.external_builder.clone();
            }
            cc.spec != before
        })
        .await?;
    chaincodes
        .modify_status(&upgrade.chaincode, retries, |cc| {
            if cc.sequence() > from {
                return false;
            }
            let status = cc.status_or_default();
            status.sequence = from + 1;
            status.phase = ChaincodePhase::Approved;
            status.conditions.push(ChaincodeCondition::success(
                ChaincodeStage::Done,
                format!("upgrading to {}", upgrade.version),
            ));
            true
        })
        .await?;
    info!(chaincode = %upgrade.chaincode, version = %upgrade.version, %proposal, "chaincode upgrade approved");
    Ok(())
}

fn upgrade_entry<'a>(cc: &'a Chaincode, proposal: &str) -> Option<&'a ChaincodeHistory> {
    cc.status.as_ref()?.history.iter().rev().find(|h| h.upgraded_by == proposal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{members_of, Fixture};
    use fabric_api::chaincode::{ChaincodeImage, ChaincodeStatus};
    use fabric_api::federation::FederationSpec;
    use fabric_api::proposal::{
        AddMember, ArchiveChannel, CreateFederation, DeleteMember, DeployChaincode, ProposalSpec,
    };
    use fabric_api::meta::NamespacedName;
    use fabric_api::Policy;

    async fn seed(fx: &Fixture, members: &[&str]) {
        fx.ctx
            .api::<Federation>()
            .create(&Federation::new(
                "fed1",
                FederationSpec {
                    members: members_of(members),
                    policy: Some(Policy::Majority),
                    description: String::new(),
                },
            ))
            .await
            .unwrap();
    }

    fn proposal(spec: ProposalSpec) -> Proposal {
        Proposal::new(
            "p1",
            ProposalSpec {
                federation: "fed1".into(),
                ..spec
            },
        )
    }

    #[tokio::test]
    async fn test_add_member_records_who_let_them_in() {
        let fx = Fixture::new().await;
        seed(&fx, &["org1", "org2"]).await;
        let p = proposal(ProposalSpec {
            add_member: Some(AddMember {
                members: vec!["org3".into()],
            }),
            ..Default::default()
        });
        apply(&fx.ctx, &p, Verdict::Approved).await.unwrap();
        apply(&fx.ctx, &p, Verdict::Approved).await.unwrap();

        let fed: Federation = fx.get(None, "fed1").await;
        assert_eq!(fed.spec.members.len(), 3);
        let joined = &fed.spec.members[2];
        assert_eq!(joined.name, "org3");
        assert_eq!(joined.joined_by, "p1");
        assert!(joined.joined_at.is_some());
    }

    #[tokio::test]
    async fn test_network_initiator_cannot_be_deleted() {
        let fx = Fixture::new().await;
        seed(&fx, &["org1", "org2"]).await;
        fx.ctx
            .api::<Network>()
            .create(&Network::new(
                "neta",
                fabric_api::network::NetworkSpec {
                    federation: "fed1".into(),
                    members: members_of(&["org2", "org1"]),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();
        let p = proposal(ProposalSpec {
            delete_member: Some(DeleteMember { member: "org2".into() }),
            ..Default::default()
        });
        assert!(apply(&fx.ctx, &p, Verdict::Approved).await.is_err());

        let p = proposal(ProposalSpec {
            delete_member: Some(DeleteMember { member: "org1".into() }),
            ..Default::default()
        });
        apply(&fx.ctx, &p, Verdict::Approved).await.unwrap();
        let fed: Federation = fx.get(None, "fed1").await;
        assert!(!fed.has_member("org1"));
        let net: Network = fx.get(None, "neta").await;
        assert!(!net.has_member("org1"));
    }

    #[tokio::test]
    async fn test_deleted_member_leaves_channels_with_its_peers() {
        let fx = Fixture::new().await;
        seed(&fx, &["org1", "org2"]).await;
        fx.network("neta", "fed1", &["org2", "org1"]).await;
        fx.network("other", "fed2", &["org1"]).await;
        fx.channel("ch1", "neta", &["org2", "org1"], &[("org2", "peer0"), ("org1", "peer0")])
            .await;
        fx.channel("ch2", "other", &["org1"], &[("org1", "peer0")]).await;

        let p = proposal(ProposalSpec {
            delete_member: Some(DeleteMember { member: "org1".into() }),
            ..Default::default()
        });
        apply(&fx.ctx, &p, Verdict::Approved).await.unwrap();

        let ch: Channel = fx.get(None, "ch1").await;
        let members: Vec<&str> = ch.spec.members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(members, vec!["org2"]);
        assert_eq!(ch.spec.peers, vec![NamespacedName::new("org2", "peer0")]);
        let untouched: Channel = fx.get(None, "ch2").await;
        assert!(untouched.spec.members.iter().any(|m| m.name == "org1"));
        assert_eq!(untouched.spec.peers.len(), 1);
    }

    #[tokio::test]
    async fn test_create_federation_outcome() {
        let fx = Fixture::new().await;
        seed(&fx, &["org1"]).await;
        let p = proposal(ProposalSpec {
            create_federation: Some(CreateFederation {}),
            ..Default::default()
        });
        apply(&fx.ctx, &p, Verdict::Rejected).await.unwrap();
        let fed: Federation = fx.get(None, "fed1").await;
        assert_eq!(fed.status_type(), Some(StatusType::Failed));
    }

    #[tokio::test]
    async fn test_archive_then_unarchive() {
        let fx = Fixture::new().await;
        fx.channel("ch1", "neta", &["org1"], &[]).await;
        let archive = proposal(ProposalSpec {
            archive_channel: Some(ArchiveChannel { channel: "ch1".into() }),
            ..Default::default()
        });
        apply(&fx.ctx, &archive, Verdict::Approved).await.unwrap();
        let ch: Channel = fx.get(None, "ch1").await;
        assert!(ch.is_archived());

        let unarchive = proposal(ProposalSpec {
            unarchive_channel: Some(fabric_api::proposal::UnarchiveChannel { channel: "ch1".into() }),
            ..Default::default()
        });
        apply(&fx.ctx, &unarchive, Verdict::Approved).await.unwrap();
        let ch: Channel = fx.get(None, "ch1").await;
        assert!(!ch.is_archived());
    }

    #[tokio::test]
    async fn test_rejected_deploy_marks_chaincode_for_deletion() {
        let fx = Fixture::new().await;
        fx.ctx.api::<Chaincode>().create(&fx.chaincode("cc1", "ch1")).await.unwrap();
        let p = proposal(ProposalSpec {
            deploy_chaincode: Some(DeployChaincode { chaincode: "cc1".into() }),
            ..Default::default()
        });
        apply(&fx.ctx, &p, Verdict::Rejected).await.unwrap();
        let cc: Chaincode = fx.get(None, "cc1").await;
        assert_eq!(cc.phase(), ChaincodePhase::Unapproved);
        assert_eq!(cc.labels()[CHAINCODE_DELETE_PROPOSAL], "p1");
    }

    async fn running_chaincode(fx: &Fixture) {
        let mut cc = fx.ctx.api::<Chaincode>().create(&fx.chaincode("cc1", "ch1")).await.unwrap();
        cc.status = Some(ChaincodeStatus {
            phase: ChaincodePhase::Running,
            ..Default::default()
        });
        fx.ctx.api::<Chaincode>().update_status(&cc).await.unwrap();
    }

    fn upgrade(version: &str, digest: &str) -> Proposal {
        proposal(ProposalSpec {
            upgrade_chaincode: Some(UpgradeChaincode {
                chaincode: "cc1".into(),
                version: version.into(),
                images: Some(ChaincodeImage {
                    name: "hyperledgerk8s/go-contract".into(),
                    digest: digest.into(),
                    pull_secret: String::new(),
                }),
                external_builder: None,
            }),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_upgrade_moves_image_to_history() {
        let fx = Fixture::new().await;
        running_chaincode(&fx).await;
        let p = upgrade("2.0", "sha256:def");
        apply(&fx.ctx, &p, Verdict::Approved).await.unwrap();
        apply(&fx.ctx, &p, Verdict::Approved).await.unwrap();

        let cc: Chaincode = fx.get(None, "cc1").await;
        assert_eq!(cc.spec.version, "2.0");
        assert_eq!(cc.spec.images.digest, "sha256:def");
        let status = cc.status.unwrap();
        assert_eq!(status.sequence, 2);
        assert_eq!(status.phase, ChaincodePhase::Approved);
        assert_eq!(status.history.len(), 1);
        assert_eq!(status.history[0].version, "1.0");
        assert_eq!(status.history[0].images.digest, "sha256:abc");
        assert_eq!(status.history[0].sequence, 1);
        assert_eq!(status.history[0].upgraded_by, "p1");
        assert_eq!(status.conditions.next_stage(), ChaincodeStage::Packaged);
    }

    #[tokio::test]
    async fn test_upgrade_same_version_new_image() {
        let fx = Fixture::new().await;
        running_chaincode(&fx).await;
        apply(&fx.ctx, &upgrade("1.0", "sha256:new"), Verdict::Approved).await.unwrap();

        let cc: Chaincode = fx.get(None, "cc1").await;
        assert_eq!(cc.spec.version, "1.0");
        assert_eq!(cc.spec.images.digest, "sha256:new");
        let status = cc.status.unwrap();
        assert_eq!(status.sequence, 2);
        assert_eq!(status.history[0].images.digest, "sha256:abc");
    }

    #[tokio::test]
    async fn test_upgrade_resumes_after_partial_write() {
        let fx = Fixture::new().await;
        running_chaincode(&fx).await;
        let chaincodes = fx.ctx.api::<Chaincode>();
        // History recorded and spec switched, sequence not yet bumped.
        let mut cc: Chaincode = fx.get(None, "cc1").await;
        cc.status.as_mut().unwrap().history.push(ChaincodeHistory {
            version: "1.0".into(),
            images: cc.spec.images.clone(),
            external_builder: None,
            sequence: 1,
            upgraded_by: "p1".into(),
            upgrade_time: Utc::now(),
        });
        chaincodes.update_status(&cc).await.unwrap();
        let mut cc: Chaincode = fx.get(None, "cc1").await;
        cc.spec.version = "2.0".into();
        cc.spec.images.digest = "sha256:def".into();
        chaincodes.update(&cc).await.unwrap();

        apply(&fx.ctx, &upgrade("2.0", "sha256:def"), Verdict::Approved).await.unwrap();

        let cc: Chaincode = fx.get(None, "cc1").await;
        let status = cc.status.unwrap();
        assert_eq!(status.sequence, 2);
        assert_eq!(status.phase, ChaincodePhase::Approved);
        assert_eq!(status.history.len(), 1);
        assert_eq!(status.history[0].images.digest, "sha256:abc");
    }
}
