//! Vote reconciler: moves a vote to `Voted` once its organization decides.

use async_trait::async_trait;
use chrono::Utc;
use fabric_api::labels::{operator_labels, VOTE_ORGANIZATION, VOTE_PROPOSAL};
use fabric_api::vote::{VotePhase, VoteStatus};
use fabric_api::{HasStatus, Resource, Vote};
use std::collections::BTreeMap;
use tracing::info;

use crate::controller::{Action, Context, Reconciler, Update};
use crate::error::Result;

pub struct VoteReconciler;

#[async_trait]
impl Reconciler for VoteReconciler {
    type Kind = Vote;

    fn labels(&self, ctx: &Context, vote: &Vote) -> BTreeMap<String, String> {
        let mut labels = operator_labels(&ctx.config.label_prefix, vote.name());
        labels.insert(VOTE_PROPOSAL.to_string(), vote.spec.proposal_name.clone());
        labels.insert(VOTE_ORGANIZATION.to_string(), vote.spec.organization_name.clone());
        labels
    }

    async fn reconcile(&self, _ctx: &Context, vote: &mut Vote, _update: Update) -> Result<Action> {
        if vote.status.is_none() {
            vote.status = Some(VoteStatus::default());
        }
        if vote.spec.decision.is_some() && vote.phase() == VotePhase::Created {
            info!(
                vote = %vote.key(),
                proposal = %vote.spec.proposal_name,
                decision = ?vote.spec.decision,
                "vote cast"
            );
            let status = vote.status_or_default();
            status.phase = VotePhase::Voted;
            status.vote_time = Some(Utc::now());
        }
        Ok(Action::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Controller;
    use crate::fixtures::Fixture;
    use fabric_api::vote::VoteSpec;

    fn vote(decision: Option<bool>) -> Vote {
        Vote::new(
            "vote-org1-p1",
            VoteSpec {
                proposal_name: "p1".into(),
                organization_name: "org1".into(),
                decision,
                description: String::new(),
            },
        )
        .with_namespace("org1")
    }

    #[tokio::test]
    async fn test_undecided_vote_stays_created() {
        let fx = Fixture::new().await;
        let mut v = vote(None);
        VoteReconciler.reconcile(&fx.ctx, &mut v, Update::full()).await.unwrap();
        assert_eq!(v.phase(), VotePhase::Created);
        assert!(v.vote_time().is_none());
    }

    #[tokio::test]
    async fn test_decision_records_vote_time_once() {
        let fx = Fixture::new().await;
        let stored = fx.ctx.namespaced::<Vote>("org1").create(&vote(Some(true))).await.unwrap();
        let controller = Controller::new(VoteReconciler, fx.ctx.clone());
        assert_eq!(controller.reconcile(&stored.key()).await.unwrap(), Action::Requeue);
        controller.reconcile(&stored.key()).await.unwrap();

        let v: Vote = fx.get(Some("org1"), "vote-org1-p1").await;
        assert_eq!(v.phase(), VotePhase::Voted);
        let first = v.vote_time().unwrap();

        controller.reconcile(&stored.key()).await.unwrap();
        let v: Vote = fx.get(Some("org1"), "vote-org1-p1").await;
        assert_eq!(v.vote_time(), Some(first));
        assert_eq!(v.labels()[VOTE_PROPOSAL], "p1");
    }
}
