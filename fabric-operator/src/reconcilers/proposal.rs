//! Proposal reconciler.
//!
//! Drives a proposal through `Pending → Voting → Finished`: fans one vote out
//! to each voter, tallies the votes against the policy, and applies the
//! decided effect exactly once before finishing.

use async_trait::async_trait;
use chrono::Utc;
use fabric_api::labels::{LabelSelector, VOTE_ORGANIZATION, VOTE_PROPOSAL};
use fabric_api::proposal::{ProposalConditionType, ProposalStatus, VoteRecord};
use fabric_api::status::ConditionStatus;
use fabric_api::vote::{vote_name, VotePhase, VoteSpec};
use fabric_api::{Federation, HasStatus, Policy, Proposal, ProposalPhase, Resource, Vote};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::controller::{Action, Context, Reconciler, Update};
use crate::error::Result;
use crate::governance::{self, Verdict};
use crate::rbac::{RbacAction, Target};

pub struct ProposalReconciler;

fn record(vote: &Vote) -> VoteRecord {
    VoteRecord {
        organization: vote.spec.organization_name.clone(),
        name: vote.name().to_string(),
        decision: vote.spec.decision,
        vote_time: vote.vote_time(),
        phase: vote.phase(),
        description: vote.spec.description.clone(),
    }
}

impl ProposalReconciler {
    /// Create one vote per voter in the voter's namespace.
    async fn deploy_votes(&self, ctx: &Context, p: &Proposal) -> Result<Vec<VoteRecord>> {
        let voters = governance::voters(ctx, p).await?;
        let mut records = Vec::with_capacity(voters.len());
        for org in &voters {
            let name = vote_name(org, p.name());
            let mut vote = Vote::new(
                &name,
                VoteSpec {
                    proposal_name: p.name().to_string(),
                    organization_name: org.clone(),
                    decision: None,
                    description: String::new(),
                },
            )
            .with_namespace(org);
            vote.metadata.labels.insert(VOTE_PROPOSAL.to_string(), p.name().to_string());
            vote.metadata.labels.insert(VOTE_ORGANIZATION.to_string(), org.clone());

            let votes = ctx.namespaced::<Vote>(org);
            let stored = match votes.create(&vote).await {
                Ok(created) => created,
                Err(e) if e.is_already_exists() => votes.get(&name).await?,
                Err(e) => return Err(e.into()),
            };
            records.push(record(&stored));
        }
        info!(proposal = %p.name(), votes = records.len(), "votes deployed");
        Ok(records)
    }

    async fn policy(&self, ctx: &Context, p: &Proposal) -> Result<Policy> {
        if let Some(policy) = p.spec.policy {
            return Ok(policy);
        }
        let fed = ctx.api::<Federation>().get_opt(&p.spec.federation).await?;
        Ok(fed.and_then(|f| f.spec.policy).unwrap_or(Policy::All))
    }

    /// Refresh the vote mirror from the vote objects, keeping entries whose
    /// vote has disappeared.
    async fn mirror_votes(&self, ctx: &Context, p: &mut Proposal) -> Result<()> {
        let votes = ctx
            .api::<Vote>()
            .list(&LabelSelector::eq(VOTE_PROPOSAL, p.name()))
            .await?;
        let status = p.status_or_default();
        for vote in &votes {
            let fresh = record(vote);
            match status.votes.iter_mut().find(|r| r.organization == fresh.organization) {
                Some(existing) => *existing = fresh,
                None => status.votes.push(fresh),
            }
        }
        status.votes.sort_by(|a, b| a.organization.cmp(&b.organization));
        Ok(())
    }

    /// One pass without the error bookkeeping.
    async fn pass(&self, ctx: &Context, p: &mut Proposal) -> Result<Action> {
        if p.status.is_none() {
            let status = p.status_or_default();
            *status = ProposalStatus::default();
            status.set_condition(ProposalConditionType::Initialized, ConditionStatus::True, "Initialized", "");
        }

        if p.phase() == ProposalPhase::Pending {
            let candidates = governance::candidates(ctx, p).await?;
            ctx.rbac()
                .reconcile(&Target::proposal(p, candidates), RbacAction::Create)
                .await?;
            let records = self.deploy_votes(ctx, p).await?;
            let status = p.status_or_default();
            status.votes = records;
            status.phase = ProposalPhase::Voting;
            status.set_condition(ProposalConditionType::Deployed, ConditionStatus::True, "VotesDeployed", "");
        }

        match p.phase() {
            ProposalPhase::Voting => self.tally(ctx, p).await,
            _ => Ok(Action::Done),
        }
    }

    async fn finish(&self, ctx: &Context, p: &mut Proposal) -> Result<()> {
        let retries = ctx.config.status_patch_retries;
        let name = p.name().to_string();
        let status = p.status_or_default();
        status.phase = ProposalPhase::Finished;
        for record in status.votes.iter_mut() {
            let marked = ctx
                .namespaced::<Vote>(&record.organization)
                .modify_status(&record.name, retries, |vote| {
                    if vote.phase() == VotePhase::Finished {
                        return false;
                    }
                    vote.status_or_default().phase = VotePhase::Finished;
                    true
                })
                .await;
            match marked {
                Ok(_) => record.phase = VotePhase::Finished,
                Err(e) if e.is_not_found() => debug!(proposal = %name, vote = %record.name, "vote already gone"),
                Err(e) => return Err(e.into()),
            }
        }
        info!(proposal = %name, "proposal finished");
        Ok(())
    }

    async fn tally(&self, ctx: &Context, p: &mut Proposal) -> Result<Action> {
        self.mirror_votes(ctx, p).await?;
        let policy = self.policy(ctx, p).await?;
        let votes = p.status.as_ref().map(|s| s.votes.as_slice()).unwrap_or_default();
        let cast = votes.iter().filter(|v| v.phase != VotePhase::Created);
        let approvals = cast.clone().filter(|v| v.decision == Some(true)).count();
        let rejections = cast.filter(|v| v.decision == Some(false)).count();
        let verdict = governance::evaluate(policy, approvals, rejections, votes.len());
        debug!(proposal = %p.name(), %policy, approvals, rejections, %verdict, "tally");

        let now = Utc::now();
        let condition = match verdict {
            Verdict::Approved => {
                governance::apply(ctx, p, Verdict::Approved).await?;
                ProposalConditionType::Succeeded
            }
            Verdict::Rejected => {
                governance::apply(ctx, p, Verdict::Rejected).await?;
                ProposalConditionType::Failed
            }
            Verdict::Pending if p.is_expired(now) => {
                info!(proposal = %p.name(), "voting window closed");
                governance::apply(ctx, p, Verdict::Rejected).await?;
                ProposalConditionType::Expired
            }
            Verdict::Pending => {
                return Ok(match p.spec.end_at {
                    Some(end) => Action::RequeueAfter((end - now).to_std().unwrap_or_default()),
                    None => Action::Done,
                });
            }
        };
        p.status_or_default()
            .set_condition(condition, ConditionStatus::True, format!("{:?}", condition), "");
        self.finish(ctx, p).await?;
        Ok(Action::Done)
    }
}

#[async_trait]
impl Reconciler for ProposalReconciler {
    type Kind = Proposal;

    async fn reconcile(&self, ctx: &Context, p: &mut Proposal, _update: Update) -> Result<Action> {
        let action = self.pass(ctx, p).await?;
        if let Some(status) = p.status.as_mut() {
            status.remove_condition(ProposalConditionType::Error);
        }
        Ok(action)
    }

    async fn cleanup(&self, ctx: &Context, p: &Proposal) -> Result<()> {
        let candidates: BTreeSet<String> = match governance::candidates(ctx, p).await {
            Ok(c) => c,
            Err(e) => {
                warn!(proposal = %p.name(), error = %e, "falling back to recorded voters");
                p.status
                    .as_ref()
                    .map(|s| s.votes.iter().map(|v| v.organization.clone()).collect())
                    .unwrap_or_default()
            }
        };
        ctx.rbac()
            .reconcile(&Target::proposal(p, candidates), RbacAction::Delete)
            .await?;
        ctx.api::<Vote>()
            .delete_collection(&LabelSelector::eq(VOTE_PROPOSAL, p.name()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{members_of, Fixture};
    use fabric_api::federation::FederationSpec;
    use fabric_api::organization::admin_cluster_role_name;
    use fabric_api::platform::ClusterRole;
    use crate::rbac::target_rule;
    use fabric_api::proposal::{AddMember, ProposalSpec};
    use crate::controller::Offering;

    async fn seed(fx: &Fixture) -> Proposal {
        for org in ["org1", "org2", "org3"] {
            fx.organization(org).await;
        }
        fx.ctx
            .api::<Federation>()
            .create(&Federation::new(
                "fed1",
                FederationSpec {
                    members: members_of(&["org1", "org2"]),
                    policy: Some(Policy::All),
                    description: String::new(),
                },
            ))
            .await
            .unwrap();
        let mut p = Proposal::new(
            "p1",
            ProposalSpec {
                federation: "fed1".into(),
                policy: Some(Policy::Majority),
                initiator_organization: "org1".into(),
                add_member: Some(AddMember {
                    members: vec!["org3".into()],
                }),
                ..Default::default()
            },
        );
        p.apply_defaults(Utc::now());
        fx.ctx.api::<Proposal>().create(&p).await.unwrap()
    }

    async fn cast(fx: &Fixture, org: &str, decision: bool) {
        let votes = fx.ctx.namespaced::<Vote>(org);
        let mut vote = votes.get(&vote_name(org, "p1")).await.unwrap();
        vote.spec.decision = Some(decision);
        let mut vote = votes.update(&vote).await.unwrap();
        vote.status = Some(fabric_api::vote::VoteStatus {
            phase: VotePhase::Voted,
            vote_time: Some(Utc::now()),
        });
        votes.update_status(&vote).await.unwrap();
    }

    #[tokio::test]
    async fn test_votes_fan_out_to_voters() {
        let fx = Fixture::new().await;
        let mut p = seed(&fx).await;
        let action = ProposalReconciler.reconcile(&fx.ctx, &mut p, Update::full()).await.unwrap();
        assert!(matches!(action, Action::RequeueAfter(_)));

        let status = p.status.as_ref().unwrap();
        assert_eq!(status.phase, ProposalPhase::Voting);
        assert!(status.is_true(ProposalConditionType::Initialized));
        assert!(status.is_true(ProposalConditionType::Deployed));
        let orgs: Vec<&str> = status.votes.iter().map(|v| v.organization.as_str()).collect();
        assert_eq!(orgs, vec!["org1", "org2"]);

        let vote: Vote = fx.get(Some("org2"), "vote-org2-p1").await;
        assert_eq!(vote.spec.decision, None);
        assert_eq!(vote.labels()[VOTE_PROPOSAL], "p1");

        // The joining organization can read the proposal without voting on it.
        let role: ClusterRole = fx.get(None, &admin_cluster_role_name("org3")).await;
        assert!(role.rules.contains(&target_rule("proposals", "p1")));
    }

    #[tokio::test]
    async fn test_votes_are_found_by_label_not_owner() {
        let fx = Fixture::new().await;
        let mut p = seed(&fx).await;
        ProposalReconciler.reconcile(&fx.ctx, &mut p, Update::full()).await.unwrap();

        let votes = fx.ctx.api::<Vote>().list(&LabelSelector::eq(VOTE_PROPOSAL, "p1")).await.unwrap();
        assert_eq!(votes.len(), 2);
        for vote in &votes {
            assert!(vote.metadata.owner_references.is_empty());
            assert_eq!(vote.labels()[VOTE_ORGANIZATION], vote.spec.organization_name);
        }
    }

    #[tokio::test]
    async fn test_majority_approval_applies_effect_once() {
        let fx = Fixture::new().await;
        let mut p = seed(&fx).await;
        ProposalReconciler.reconcile(&fx.ctx, &mut p, Update::full()).await.unwrap();

        cast(&fx, "org1", true).await;
        ProposalReconciler.reconcile(&fx.ctx, &mut p, Update::default()).await.unwrap();
        assert_eq!(p.phase(), ProposalPhase::Voting);

        cast(&fx, "org2", true).await;
        let action = ProposalReconciler.reconcile(&fx.ctx, &mut p, Update::default()).await.unwrap();
        assert_eq!(action, Action::Done);
        let status = p.status.as_ref().unwrap();
        assert_eq!(status.phase, ProposalPhase::Finished);
        assert!(status.is_true(ProposalConditionType::Succeeded));
        assert!(status.votes.iter().all(|v| v.phase == VotePhase::Finished));

        let fed: Federation = fx.get(None, "fed1").await;
        assert!(fed.has_member("org3"));
        let vote: Vote = fx.get(Some("org1"), "vote-org1-p1").await;
        assert_eq!(vote.phase(), VotePhase::Finished);
    }

    #[tokio::test]
    async fn test_successful_pass_clears_earlier_error() {
        let fx = Fixture::new().await;
        let mut p = seed(&fx).await;
        ProposalReconciler.reconcile(&fx.ctx, &mut p, Update::full()).await.unwrap();
        p.record_error(&crate::error::OperatorError::InvalidState("vote conflict".into()));
        assert!(p.status.as_ref().unwrap().is_true(ProposalConditionType::Error));

        cast(&fx, "org1", true).await;
        cast(&fx, "org2", true).await;
        ProposalReconciler.reconcile(&fx.ctx, &mut p, Update::default()).await.unwrap();
        let status = p.status.as_ref().unwrap();
        assert!(status.is_true(ProposalConditionType::Succeeded));
        assert!(status.condition(ProposalConditionType::Error).is_none());
    }

    #[tokio::test]
    async fn test_rejection_fails_the_proposal() {
        let fx = Fixture::new().await;
        let mut p = seed(&fx).await;
        ProposalReconciler.reconcile(&fx.ctx, &mut p, Update::full()).await.unwrap();
        cast(&fx, "org1", false).await;
        ProposalReconciler.reconcile(&fx.ctx, &mut p, Update::default()).await.unwrap();
        let status = p.status.as_ref().unwrap();
        assert!(status.is_true(ProposalConditionType::Failed));
        let fed: Federation = fx.get(None, "fed1").await;
        assert!(!fed.has_member("org3"));
    }

    #[tokio::test]
    async fn test_empty_window_expires_on_first_pass() {
        let fx = Fixture::new().await;
        let mut p = seed(&fx).await;
        p.spec.end_at = p.spec.start_at;
        ProposalReconciler.reconcile(&fx.ctx, &mut p, Update::full()).await.unwrap();
        let status = p.status.as_ref().unwrap();
        assert_eq!(status.phase, ProposalPhase::Finished);
        assert!(status.is_true(ProposalConditionType::Expired));
    }

    #[tokio::test]
    async fn test_cleanup_removes_votes_and_rules() {
        let fx = Fixture::new().await;
        let mut p = seed(&fx).await;
        ProposalReconciler.reconcile(&fx.ctx, &mut p, Update::full()).await.unwrap();
        ProposalReconciler.cleanup(&fx.ctx, &p).await.unwrap();

        assert!(fx.ctx.namespaced::<Vote>("org1").get_opt("vote-org1-p1").await.unwrap().is_none());
        let role: ClusterRole = fx.get(None, &admin_cluster_role_name("org3")).await;
        assert!(!role.rules.contains(&target_rule("proposals", "p1")));
    }
}
