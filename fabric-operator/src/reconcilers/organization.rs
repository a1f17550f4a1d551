//! Organization reconciler: user namespace, MSP secret and the eight RBAC
//! objects every organization owns.

use async_trait::async_trait;
use fabric_api::labels::{operator_labels, LabelSelector, ORGANIZATION_ADMIN};
use fabric_api::organization::{msp_secret_name, CaRef, OrganizationStatus};
use fabric_api::platform::{ClusterRole, ClusterRoleBinding, Namespace, PolicyRule, Role, RoleBinding, Secret};
use fabric_api::status::StatusType;
use fabric_api::{ErrorCode, Federation, HasStatus, ObjectMeta, Organization, Resource};
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::{adopt, ensure};
use crate::controller::{settle, Action, Context, Reconciler, Update};
use crate::error::{OperatorError, Result, SdkError};
use crate::rbac;
use crate::sdk::{ADMIN_CERT_KEY, ADMIN_KEY_KEY, CA_CERT_KEY};

pub struct OrganizationReconciler;

/// CA an organization enrolls against when none is declared.
fn ca_of(org: &Organization) -> CaRef {
    org.spec.ca_ref.clone().unwrap_or_else(|| CaRef {
        name: org.name().to_string(),
        ca: "ca".to_string(),
    })
}

fn ensure_base_rules(cur: &mut Vec<PolicyRule>, base: &[PolicyRule]) -> bool {
    let mut changed = false;
    for rule in base {
        changed |= rbac::ensure_rule(cur, rule);
    }
    changed
}

impl OrganizationReconciler {
    async fn ensure_namespace(&self, ctx: &Context, org: &Organization) -> Result<()> {
        let mut ns = Namespace {
            metadata: ObjectMeta::named(org.user_namespace()),
        };
        ns.metadata.labels = operator_labels(&ctx.config.label_prefix, org.name());
        adopt(&mut ns.metadata, org);
        ensure(
            &ctx.api::<Namespace>(),
            ns,
            |_, _| false,
            ErrorCode::OrganizationInitializationFailed,
            ErrorCode::OrganizationInitializationFailed,
        )
        .await?;
        Ok(())
    }

    /// Enroll the admin and write the MSP secret.
    async fn ensure_msp(&self, ctx: &Context, org: &Organization, refresh: bool) -> Result<()> {
        let secrets = ctx.namespaced::<Secret>(org.user_namespace());
        let name = msp_secret_name(org.name());
        let existing = secrets.get_opt(&name).await?;
        if existing.is_some() && !refresh {
            return Ok(());
        }

        let ca = ca_of(org);
        let enrollment = ctx
            .sdk
            .enroll(&ca, org.msp_id(), &org.spec.admin)
            .await
            .map_err(|e| match e {
                SdkError::Failed(msg) => OperatorError::breaking(
                    ErrorCode::OrganizationInitializationFailed,
                    format!("enroll admin {}: {}", org.spec.admin, msg),
                ),
                other => other.into(),
            })?;

        let mut data = BTreeMap::new();
        data.insert(ADMIN_CERT_KEY.to_string(), enrollment.identity.cert);
        data.insert(ADMIN_KEY_KEY.to_string(), enrollment.identity.key);
        data.insert(CA_CERT_KEY.to_string(), enrollment.ca_cert);

        let mut secret = Secret {
            metadata: ObjectMeta::namespaced(org.user_namespace(), &name),
            data,
        };
        adopt(&mut secret.metadata, org);
        ensure(
            &secrets,
            secret,
            |cur, want| {
                if cur.data == want.data {
                    return false;
                }
                cur.data = want.data.clone();
                true
            },
            ErrorCode::OrganizationInitializationFailed,
            ErrorCode::OrganizationInitializationFailed,
        )
        .await?;
        info!(organization = %org.name(), ca = %ca.name, "admin enrolled");
        Ok(())
    }

    async fn ensure_rbac(&self, ctx: &Context, org: &Organization) -> Result<()> {
        // Cluster roles: base rules are ensured, rules added by the
        // synchronizer are left alone.
        for role in [rbac::admin_cluster_role(org), rbac::client_cluster_role(org)] {
            ensure(
                &ctx.api::<ClusterRole>(),
                role,
                |cur, want| ensure_base_rules(&mut cur.rules, &want.rules),
                ErrorCode::InvalidClusterRoleCreateRequest,
                ErrorCode::InvalidClusterRoleUpdateRequest,
            )
            .await?;
        }

        for binding in [rbac::admin_cluster_role_binding(org), rbac::client_cluster_role_binding(org)] {
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
        }

        let roles = ctx.namespaced::<Role>(org.user_namespace());
        for role in [rbac::admin_role(org), rbac::client_role(org)] {
            ensure(
                &roles,
                role,
                |cur, want| {
                    if cur.rules == want.rules {
                        return false;
                    }
                    cur.rules = want.rules.clone();
                    true
                },
                ErrorCode::InvalidRoleCreateRequest,
                ErrorCode::InvalidRoleUpdateRequest,
            )
            .await?;
        }

        let bindings = ctx.namespaced::<RoleBinding>(org.user_namespace());
        for binding in [rbac::admin_role_binding(org), rbac::client_role_binding(org)] {
            ensure(
                &bindings,
                binding,
                |cur, want| {
                    if cur.subjects == want.subjects {
                        return false;
                    }
                    cur.subjects = want.subjects.clone();
                    true
                },
                ErrorCode::InvalidRoleBindingCreateRequest,
                ErrorCode::InvalidRoleBindingUpdateRequest,
            )
            .await?;
        }
        Ok(())
    }

    async fn federations(&self, ctx: &Context, org: &Organization) -> Result<Vec<String>> {
        let mut names: Vec<String> = ctx
            .api::<Federation>()
            .list(&LabelSelector::everything())
            .await?
            .into_iter()
            .filter(|f| f.has_member(org.name()))
            .map(|f| f.name().to_string())
            .collect();
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl Reconciler for OrganizationReconciler {
    type Kind = Organization;

    fn mirror_prefix(&self) -> Option<&'static str> {
        Some("org")
    }

    fn labels(&self, ctx: &Context, org: &Organization) -> BTreeMap<String, String> {
        let mut labels = operator_labels(&ctx.config.label_prefix, org.name());
        labels.insert(ORGANIZATION_ADMIN.to_string(), org.spec.admin.clone());
        labels
    }

    fn diff(&self, old: &Organization, new: &Organization) -> Update {
        if old.spec == new.spec {
            return Update::default();
        }
        Update {
            spec_updated: true,
            admin_or_ca_updated: old.spec.admin != new.spec.admin || old.spec.ca_ref != new.spec.ca_ref,
            ..Default::default()
        }
    }

    async fn reconcile(&self, ctx: &Context, org: &mut Organization, update: Update) -> Result<Action> {
        self.ensure_namespace(ctx, org).await?;
        self.ensure_msp(ctx, org, update.admin_or_ca_updated).await?;
        self.ensure_rbac(ctx, org).await?;

        let federations = match self.federations(ctx, org).await {
            Ok(f) => f,
            Err(e) => {
                warn!(organization = %org.name(), error = %e, "listing federations failed");
                org.status.as_ref().map(|s| s.federations.clone()).unwrap_or_default()
            }
        };

        let was_created = org.status.as_ref().map(|s| s.cr.is(StatusType::Created)).unwrap_or(false);
        let status: &mut OrganizationStatus = org.status_or_default();
        status.federations = federations;
        settle(&mut status.cr, StatusType::Created, "OrganizationCreated", "");
        status.cr.version = Some(env!("CARGO_PKG_VERSION").to_string());
        if !was_created {
            info!(organization = %org.name(), "organization created");
        }
        Ok(Action::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Controller;
    use crate::fixtures::Fixture;
    use crate::sdk::MockSdk;
    use fabric_api::organization::{
        admin_cluster_role_binding_name, admin_cluster_role_name, admin_role_binding_name, client_cluster_role_name,
        OrganizationSpec,
    };
    use std::sync::Arc;

    fn org1() -> Organization {
        Organization::new(
            "org1",
            OrganizationSpec {
                admin: "alice".into(),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_organization_materialises_namespace_secret_and_rbac() {
        let fx = Fixture::new().await;
        let created = fx.ctx.api::<Organization>().create(&org1()).await.unwrap();
        let controller = Controller::new(OrganizationReconciler, fx.ctx.clone());

        // First pass reconciles labels, second does the work.
        assert_eq!(controller.reconcile(&created.key()).await.unwrap(), Action::Requeue);
        assert_eq!(controller.reconcile(&created.key()).await.unwrap(), Action::Done);

        let org: Organization = fx.get(None, "org1").await;
        assert_eq!(org.labels()[ORGANIZATION_ADMIN], "alice");
        let status = org.status.unwrap();
        assert!(status.cr.is(StatusType::Created));
        assert!(status.cr.version.is_some());

        let _: Namespace = fx.get(None, "org1").await;
        let secret: Secret = fx.get(Some("org1"), &msp_secret_name("org1")).await;
        assert_eq!(secret.data[ADMIN_CERT_KEY], b"cert:org1:alice".to_vec());
        assert_eq!(secret.data[CA_CERT_KEY], b"ca:org1:ca".to_vec());

        let _: ClusterRole = fx.get(None, &admin_cluster_role_name("org1")).await;
        let _: ClusterRole = fx.get(None, &client_cluster_role_name("org1")).await;
        let crb: ClusterRoleBinding = fx.get(None, &admin_cluster_role_binding_name("org1")).await;
        assert_eq!(crb.subjects[0].name, "alice");
        let rb: RoleBinding = fx.get(Some("org1"), &admin_role_binding_name("org1")).await;
        assert!(rb.metadata.is_owned_by(Organization::KIND, "org1"));
        assert_eq!(fx.sdk.call_count("enroll"), 1);
    }

    #[tokio::test]
    async fn test_admin_change_reenrolls_and_rebinds() {
        let fx = Fixture::new().await;
        let created = fx.ctx.api::<Organization>().create(&org1()).await.unwrap();
        let controller = Controller::new(OrganizationReconciler, fx.ctx.clone());
        controller.reconcile(&created.key()).await.unwrap();
        controller.reconcile(&created.key()).await.unwrap();

        let mut org: Organization = fx.get(None, "org1").await;
        let old = org.clone();
        org.spec.admin = "bob".into();
        let update = OrganizationReconciler.diff(&old, &org);
        assert!(update.admin_or_ca_updated);

        OrganizationReconciler.reconcile(&fx.ctx, &mut org, update).await.unwrap();
        let secret: Secret = fx.get(Some("org1"), &msp_secret_name("org1")).await;
        assert_eq!(secret.data[ADMIN_CERT_KEY], b"cert:org1:bob".to_vec());
        let crb: ClusterRoleBinding = fx.get(None, &admin_cluster_role_binding_name("org1")).await;
        assert_eq!(crb.subjects[0].name, "bob");
        assert_eq!(fx.sdk.call_count("enroll"), 2);
    }

    #[tokio::test]
    async fn test_synced_rules_survive_reconcile() {
        let fx = Fixture::new().await;
        let mut org = fx.ctx.api::<Organization>().create(&org1()).await.unwrap();
        OrganizationReconciler.reconcile(&fx.ctx, &mut org, Update::full()).await.unwrap();

        let extra = rbac::target_rule("federations", "fed1");
        fx.ctx
            .api::<ClusterRole>()
            .modify(&admin_cluster_role_name("org1"), 3, |r| rbac::ensure_rule(&mut r.rules, &extra))
            .await
            .unwrap();

        OrganizationReconciler.reconcile(&fx.ctx, &mut org, Update::default()).await.unwrap();
        let role: ClusterRole = fx.get(None, &admin_cluster_role_name("org1")).await;
        assert!(role.rules.contains(&extra));
    }

    #[tokio::test]
    async fn test_rejected_enrollment_is_breaking() {
        let fx = Fixture::new().await;
        let ctx = Context::new(
            fx.dyn_store(),
            Arc::new(MockSdk::new().with_enroll_failure(true)),
            (*fx.ctx.config).clone(),
        );
        let mut org = ctx.api::<Organization>().create(&org1()).await.unwrap();
        let err = OrganizationReconciler.reconcile(&ctx, &mut org, Update::full()).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::OrganizationInitializationFailed));
    }
}
