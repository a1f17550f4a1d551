//! Rules for proposals and votes.

use async_trait::async_trait;
use chrono::Utc;
use fabric_api::{Proposal, Vote};

use super::errors::{AdmissionError, AdmissionResult};
use super::webhook::{Caller, Webhook};
use crate::controller::Context;

pub struct ProposalWebhook;

#[async_trait]
impl Webhook for ProposalWebhook {
    type Kind = Proposal;

    async fn default(&self, _ctx: &Context, _caller: &Caller, proposal: &mut Proposal) -> AdmissionResult<()> {
        proposal.apply_defaults(Utc::now());
        Ok(())
    }

    async fn validate_create(&self, _ctx: &Context, _caller: &Caller, proposal: &Proposal) -> AdmissionResult<()> {
        if proposal.spec.intent().is_none() {
            return Err(AdmissionError::NullProposalPurpose);
        }
        Ok(())
    }

    async fn validate_update(&self, _ctx: &Context, _caller: &Caller, old: &Proposal, new: &Proposal) -> AdmissionResult<()> {
        if old.spec.purpose() != new.spec.purpose() {
            return Err(AdmissionError::ChangeProposalPurpose);
        }
        Ok(())
    }
}

pub struct VoteWebhook;

#[async_trait]
impl Webhook for VoteWebhook {
    type Kind = Vote;

    async fn validate_update(&self, _ctx: &Context, _caller: &Caller, old: &Vote, new: &Vote) -> AdmissionResult<()> {
        match old.spec.decision {
            Some(cast) if new.spec.decision != Some(cast) => Err(AdmissionError::ChangeVoteDecision),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{caller, Fixture};
    use fabric_api::proposal::{AddMember, DissolveFederation, ProposalSpec, DEFAULT_VOTING_HOURS};
    use fabric_api::vote::VoteSpec;

    fn add_member() -> Proposal {
        Proposal::new(
            "p1",
            ProposalSpec {
                federation: "fed1".into(),
                add_member: Some(AddMember {
                    members: vec!["org3".into()],
                }),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_default_fills_voting_window() {
        let fx = Fixture::new().await;
        let mut p = add_member();
        ProposalWebhook.default(&fx.ctx, &caller("org1-admin"), &mut p).await.unwrap();
        let start = p.spec.start_at.unwrap();
        assert_eq!(p.spec.end_at.unwrap() - start, chrono::Duration::hours(DEFAULT_VOTING_HOURS));
    }

    #[tokio::test]
    async fn test_purpose_required_and_fixed() {
        let fx = Fixture::new().await;
        let hook = ProposalWebhook;
        let who = caller("org1-admin");
        let mut empty = add_member();
        empty.spec.add_member = None;
        let err = hook.validate_create(&fx.ctx, &who, &empty).await.unwrap_err();
        assert_eq!(err.reason(), "ErrNullProposalPurpose");

        let mut both = add_member();
        both.spec.dissolve_federation = Some(DissolveFederation {});
        assert!(hook.validate_create(&fx.ctx, &who, &both).await.is_err());

        let old = add_member();
        let mut switched = old.clone();
        switched.spec.add_member = None;
        switched.spec.dissolve_federation = Some(DissolveFederation {});
        let err = hook.validate_update(&fx.ctx, &who, &old, &switched).await.unwrap_err();
        assert_eq!(err.reason(), "ErrChangeProposalPurpose");

        let mut described = old.clone();
        described.spec.description = "updated".into();
        assert!(hook.validate_update(&fx.ctx, &who, &old, &described).await.is_ok());
    }

    #[tokio::test]
    async fn test_cast_vote_is_final() {
        let fx = Fixture::new().await;
        let vote = |decision| {
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
        };
        let hook = VoteWebhook;
        let who = caller("org1-admin");
        assert!(hook.validate_update(&fx.ctx, &who, &vote(None), &vote(Some(true))).await.is_ok());
        assert!(hook.validate_update(&fx.ctx, &who, &vote(Some(true)), &vote(Some(true))).await.is_ok());
        for changed in [Some(false), None] {
            let err = hook
                .validate_update(&fx.ctx, &who, &vote(Some(true)), &vote(changed))
                .await
                .unwrap_err();
            assert_eq!(err.reason(), "ErrChangeVoteDecision");
        }
    }
}
