//! Federation reconciler.
//!
//! Exposes the federation to its member admins through one cluster-role and
//! one cluster-role-binding, and propagates membership into each member's
//! admin cluster-role. The status follows the governance outcome: Pending
//! until the creating proposal finishes, then Activated or Failed, and
//! Dissolved once a dissolve proposal succeeds.

use async_trait::async_trait;
use fabric_api::federation::{federation_role_name, FederationStatus, MemberDelta};
use fabric_api::labels::{operator_labels, LabelSelector, FEDERATION_INITIATOR};
use fabric_api::meta::GROUP;
use fabric_api::platform::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use fabric_api::proposal::{ProposalConditionType, ProposalPhase};
use fabric_api::status::StatusType;
use fabric_api::{ErrorCode, Federation, HasStatus, Network, ObjectMeta, Organization, Proposal, Purpose, Resource};
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::{adopt, ensure};
use crate::controller::{settle, Action, Context, Reconciler, Update};
use crate::error::{OperatorError, Result};
use crate::rbac::{RbacAction, Target};

pub struct FederationReconciler;

/// Status derived from the proposals that govern the federation.
fn governed_status(fed: &Federation, proposals: &[Proposal]) -> (StatusType, &'static str) {
    let mine = move || proposals.iter().filter(move |p| p.spec.federation == fed.name());
    let succeeded = |p: &&Proposal| {
        p.status
            .as_ref()
            .map(|s| s.is_true(ProposalConditionType::Succeeded))
            .unwrap_or(false)
    };

    if mine()
        .filter(|p| p.spec.purpose() == Some(Purpose::DissolveFederation))
        .any(|p| succeeded(&p))
    {
        return (StatusType::Dissolved, "FederationDissolved");
    }
    let creating: Vec<&Proposal> = mine()
        .filter(|p| p.spec.purpose() == Some(Purpose::CreateFederation))
        .collect();
    if creating.iter().any(succeeded) {
        return (StatusType::Activated, "FederationActivated");
    }
    if !creating.is_empty() && creating.iter().all(|p| p.phase() == ProposalPhase::Finished) {
        return (StatusType::Failed, "FederationFailed");
    }
    (StatusType::Pending, "FederationPending")
}

impl FederationReconciler {
    fn precheck(&self, fed: &Federation) -> Result<()> {
        if fed.initiator().is_none() {
            return Err(OperatorError::breaking(
                ErrorCode::FederationInitializationFailed,
                format!("federation {} must have exactly one initiator", fed.name()),
            ));
        }
        if fed.spec.policy.is_none() {
            return Err(OperatorError::breaking(
                ErrorCode::FederationInitializationFailed,
                format!("federation {} has no policy", fed.name()),
            ));
        }
        Ok(())
    }

    async fn ensure_role(&self, ctx: &Context, fed: &Federation) -> Result<()> {
        let name = federation_role_name(fed.name());
        let mut role = ClusterRole {
            metadata: ObjectMeta::named(&name),
            rules: vec![PolicyRule::new(GROUP, Federation::PLURAL, &["get"]).with_names(&[fed.name()])],
        };
        adopt(&mut role.metadata, fed);
        ensure(
            &ctx.api::<ClusterRole>(),
            role,
            |cur, want| {
                if cur.rules == want.rules {
                    return false;
                }
                cur.rules = want.rules.clone();
                true
            },
            ErrorCode::InvalidClusterRoleCreateRequest,
            ErrorCode::InvalidClusterRoleUpdateRequest,
        )
        .await?;

        let orgs = ctx.api::<Organization>();
        let mut subjects = Vec::new();
        for member in &fed.spec.members {
            match orgs.get_opt(&member.name).await? {
                Some(org) if !org.spec.admin.is_empty() => subjects.push(Subject::user(org.spec.admin)),
                Some(_) => {}
                None => warn!(federation = %fed.name(), member = %member.name, "member organization not found"),
            }
        }
        let mut binding = ClusterRoleBinding {
            metadata: ObjectMeta::named(&name),
            subjects,
            role_ref: RoleRef::cluster_role(&name),
        };
        adopt(&mut binding.metadata, fed);
        ensure(
            &ctx.api::<ClusterRoleBinding>(),
            binding,
            |cur, want| {
                if cur.subjects == want.subjects {
                    return false;
                }
                cur.subjects = want.subjects.clone();
                true
            },
            ErrorCode::InvalidClusterRoleBindingCreateRequest,
            ErrorCode::InvalidClusterRoleBindingUpdateRequest,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for FederationReconciler {
    type Kind = Federation;

    fn mirror_prefix(&self) -> Option<&'static str> {
        Some("fed")
    }

    fn labels(&self, ctx: &Context, fed: &Federation) -> BTreeMap<String, String> {
        let mut labels = operator_labels(&ctx.config.label_prefix, fed.name());
        if let Some(initiator) = fed.initiator() {
            labels.insert(FEDERATION_INITIATOR.to_string(), initiator.name.clone());
        }
        labels
    }

    fn diff(&self, old: &Federation, new: &Federation) -> Update {
        if old.spec == new.spec {
            return Update::default();
        }
        Update {
            spec_updated: true,
            member_updated: !MemberDelta::between(&old.spec.members, &new.spec.members).is_empty(),
            ..Default::default()
        }
    }

    async fn reconcile(&self, ctx: &Context, fed: &mut Federation, update: Update) -> Result<Action> {
        self.precheck(fed)?;
        self.ensure_role(ctx, fed).await?;

        if update.member_updated {
            ctx.rbac().reconcile(&Target::federation(fed), RbacAction::Update).await?;
        }

        let mut networks: Vec<String> = ctx
            .api::<Network>()
            .list(&LabelSelector::everything())
            .await?
            .into_iter()
            .filter(|n| n.spec.federation == fed.name())
            .map(|n| n.name().to_string())
            .collect();
        networks.sort();

        let current = fed.status_type();
        let settled = matches!(
            current,
            Some(StatusType::Activated) | Some(StatusType::Failed) | Some(StatusType::Dissolved)
        );
        let next = if settled {
            None
        } else {
            let proposals = ctx.api::<Proposal>().list(&LabelSelector::everything()).await?;
            Some(governed_status(fed, &proposals))
        };

        let name = fed.name().to_string();
        let status: &mut FederationStatus = fed.status_or_default();
        status.networks = networks;
        if let Some((status_type, reason)) = next {
            if current != Some(status_type) {
                info!(federation = %name, status = %status_type, "federation status");
            }
            settle(&mut status.cr, status_type, reason, "");
        }
        Ok(Action::Done)
    }

    async fn cleanup(&self, ctx: &Context, fed: &Federation) -> Result<()> {
        ctx.rbac().reconcile(&Target::federation(fed), RbacAction::Delete).await
    }
}
