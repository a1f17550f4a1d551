//! RBAC synchronizer.
//!
//! Every federation, network, channel and proposal grants `get` on itself to
//! the admins of its candidate organizations through one rule on each
//! organization's admin cluster-role. The synchronizer is the only writer of
//! those rules; it reads, modifies and writes the whole rule list with
//! compare-and-swap.

use fabric_api::federation::member_names;
use fabric_api::meta::GROUP;
use fabric_api::organization::{
    admin_cluster_role_binding_name, admin_cluster_role_name, admin_role_binding_name, admin_role_name,
    client_cluster_role_binding_name, client_cluster_role_name, client_role_binding_name, client_role_name,
};
use fabric_api::labels::LabelSelector;
use fabric_api::platform::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use fabric_api::{Channel, ErrorCode, Federation, Network, ObjectMeta, Organization, Proposal, Resource};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{OperatorError, Result, StoreError};
use crate::store::{Api, ObjectStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RbacAction {
    Create,
    Update,
    Delete,
}

/// An object exposed to the admins of `candidates`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub plural: &'static str,
    pub name: String,
    pub candidates: BTreeSet<String>,
}

impl Target {
    pub fn federation(fed: &Federation) -> Self {
        Self {
            plural: Federation::PLURAL,
            name: fed.name().to_string(),
            candidates: member_names(&fed.spec.members),
        }
    }

    pub fn network(net: &Network) -> Self {
        Self {
            plural: Network::PLURAL,
            name: net.name().to_string(),
            candidates: member_names(&net.spec.members),
        }
    }

    pub fn channel(ch: &Channel) -> Self {
        Self {
            plural: Channel::PLURAL,
            name: ch.name().to_string(),
            candidates: member_names(&ch.spec.members),
        }
    }

    /// Proposal candidates depend on the intent and are derived by the
    /// governance module.
    pub fn proposal(proposal: &Proposal, candidates: BTreeSet<String>) -> Self {
        Self {
            plural: Proposal::PLURAL,
            name: proposal.name().to_string(),
            candidates,
        }
    }

    pub fn rule(&self) -> PolicyRule {
        target_rule(self.plural, &self.name)
    }
}

/// `get` on one named object of the blockchain group.
pub fn target_rule(plural: &str, name: &str) -> PolicyRule {
    PolicyRule::new(GROUP, plural, &["get"]).with_names(&[name])
}

/// Append `rule` unless a rule with the same identity exists.
pub fn ensure_rule(rules: &mut Vec<PolicyRule>, rule: &PolicyRule) -> bool {
    let identity = rule.identity();
    if rules.iter().any(|r| r.identity() == identity) {
        return false;
    }
    rules.push(rule.clone());
    true
}

/// Remove every rule with `rule`'s identity.
pub fn remove_rule(rules: &mut Vec<PolicyRule>, rule: &PolicyRule) -> bool {
    let identity = rule.identity();
    let before = rules.len();
    rules.retain(|r| r.identity() != identity);
    rules.len() != before
}

#[derive(Clone)]
pub struct RbacSync {
    store: Arc<dyn ObjectStore>,
    retries: u32,
}

impl RbacSync {
    pub fn new(store: Arc<dyn ObjectStore>, retries: u32) -> Self {
        Self {
            store,
            retries: retries.max(1),
        }
    }

    pub async fn reconcile(&self, target: &Target, action: RbacAction) -> Result<()> {
        let rule = target.rule();
        debug!(resource = target.plural, name = %target.name, ?action, "rbac sync");
        match action {
            RbacAction::Create => {
                for org in &target.candidates {
                    self.modify(org, true, |rules| ensure_rule(rules, &rule)).await?;
                }
            }
            RbacAction::Update => {
                let mut orgs = self.organizations().await?;
                orgs.extend(target.candidates.iter().cloned());
                for org in &orgs {
                    if target.candidates.contains(org) {
                        self.modify(org, true, |rules| ensure_rule(rules, &rule)).await?;
                    } else {
                        self.modify(org, false, |rules| remove_rule(rules, &rule)).await?;
                    }
                }
            }
            RbacAction::Delete => {
                for org in self.organizations().await? {
                    self.modify(&org, false, |rules| remove_rule(rules, &rule)).await?;
                }
            }
        }
        Ok(())
    }

    async fn organizations(&self) -> Result<BTreeSet<String>> {
        Ok(Api::<Organization>::all(Arc::clone(&self.store))
            .list(&LabelSelector::everything())
            .await?
            .into_iter()
            .map(|o| o.metadata.name)
            .collect())
    }

    /// Read-modify-write `org`'s admin cluster-role. `edit` returns whether it
    /// changed anything. A missing role is an error only when `required`.
    async fn modify<F>(&self, org: &str, required: bool, edit: F) -> Result<()>
    where
        F: Fn(&mut Vec<PolicyRule>) -> bool,
    {
        let api = Api::<ClusterRole>::all(Arc::clone(&self.store));
        let name = admin_cluster_role_name(org);
        for _ in 0..self.retries {
            let mut role = match api.get_opt(&name).await? {
                Some(role) => role,
                None if required => {
                    return Err(OperatorError::InvalidState(format!(
                        "admin cluster role {} does not exist yet",
                        name
                    )))
                }
                None => return Ok(()),
            };
            if !edit(&mut role.rules) {
                return Ok(());
            }
            match api.update(&role).await {
                Ok(_) => {
                    info!(cluster_role = %name, "admin rules updated");
                    return Ok(());
                }
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(OperatorError::from_store(e, ErrorCode::InvalidClusterRoleUpdateRequest)),
            }
        }
        Err(StoreError::Conflict(format!("{}: retries exhausted", name)).into())
    }
}

const ALL_VERBS: &[&str] = &["get", "list", "watch", "create", "update", "patch", "delete"];
const READ_VERBS: &[&str] = &["get", "list", "watch"];

/// Rules every admin cluster-role starts with.
pub fn admin_base_rules(org: &str) -> Vec<PolicyRule> {
    vec![
        PolicyRule::new(GROUP, Organization::PLURAL, &["get", "update", "patch"]).with_names(&[org]),
        PolicyRule {
            api_groups: vec![GROUP.to_string()],
            resources: [
                Federation::PLURAL,
                Proposal::PLURAL,
                Network::PLURAL,
                Channel::PLURAL,
                fabric_api::Chaincode::PLURAL,
                fabric_api::ChaincodeBuild::PLURAL,
                fabric_api::EndorsePolicy::PLURAL,
            ]
            .iter()
            .map(|r| r.to_string())
            .collect(),
            resource_names: Vec::new(),
            verbs: vec!["create".to_string()],
        },
    ]
}

pub fn client_base_rules(org: &str) -> Vec<PolicyRule> {
    vec![PolicyRule::new(GROUP, Organization::PLURAL, &["get"]).with_names(&[org])]
}

fn owned_meta(name: String, namespace: Option<&str>, org: &Organization) -> ObjectMeta {
    let mut meta = match namespace {
        Some(ns) => ObjectMeta::namespaced(ns, name),
        None => ObjectMeta::named(name),
    };
    meta.owner_references.push(org.controller_reference());
    meta
}

pub fn admin_cluster_role(org: &Organization) -> ClusterRole {
    ClusterRole {
        metadata: owned_meta(admin_cluster_role_name(org.name()), None, org),
        rules: admin_base_rules(org.name()),
    }
}

pub fn client_cluster_role(org: &Organization) -> ClusterRole {
    ClusterRole {
        metadata: owned_meta(client_cluster_role_name(org.name()), None, org),
        rules: client_base_rules(org.name()),
    }
}

fn users(names: impl IntoIterator<Item = String>) -> Vec<Subject> {
    names.into_iter().filter(|n| !n.is_empty()).map(Subject::user).collect()
}

pub fn admin_cluster_role_binding(org: &Organization) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: owned_meta(admin_cluster_role_binding_name(org.name()), None, org),
        subjects: users([org.spec.admin.clone()]),
        role_ref: RoleRef::cluster_role(admin_cluster_role_name(org.name())),
    }
}

pub fn client_cluster_role_binding(org: &Organization) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: owned_meta(client_cluster_role_binding_name(org.name()), None, org),
        subjects: users(org.spec.clients.iter().cloned()),
        role_ref: RoleRef::cluster_role(client_cluster_role_name(org.name())),
    }
}

pub fn admin_role(org: &Organization) -> Role {
    Role {
        metadata: owned_meta(admin_role_name(org.name()), Some(org.user_namespace()), org),
        rules: vec![
            PolicyRule::new(GROUP, "ibppeers", ALL_VERBS),
            PolicyRule::new(GROUP, fabric_api::Vote::PLURAL, &["get", "list", "watch", "update", "patch"]),
            PolicyRule {
                api_groups: vec![String::new()],
                resources: vec!["configmaps".to_string(), "secrets".to_string()],
                resource_names: Vec::new(),
                verbs: READ_VERBS.iter().map(|v| v.to_string()).collect(),
            },
        ],
    }
}

pub fn client_role(org: &Organization) -> Role {
    Role {
        metadata: owned_meta(client_role_name(org.name()), Some(org.user_namespace()), org),
        rules: vec![
            PolicyRule::new(GROUP, "ibppeers", READ_VERBS),
            PolicyRule::new(GROUP, fabric_api::Vote::PLURAL, READ_VERBS),
        ],
    }
}

pub fn admin_role_binding(org: &Organization) -> RoleBinding {
    RoleBinding {
        metadata: owned_meta(admin_role_binding_name(org.name()), Some(org.user_namespace()), org),
        subjects: users([org.spec.admin.clone()]),
        role_ref: RoleRef::role(admin_role_name(org.name())),
    }
}

pub fn client_role_binding(org: &Organization) -> RoleBinding {
    RoleBinding {
        metadata: owned_meta(client_role_binding_name(org.name()), Some(org.user_namespace()), org),
        subjects: users(org.spec.clients.iter().cloned()),
        role_ref: RoleRef::role(client_role_name(org.name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use fabric_api::federation::FederationSpec;
    use fabric_api::organization::OrganizationSpec;
    use fabric_api::{Member, Policy};

    fn org(name: &str) -> Organization {
        Organization::new(
            name,
            OrganizationSpec {
                admin: format!("{}-admin", name),
                ..Default::default()
            },
        )
    }

    async fn seed(store: &Arc<dyn ObjectStore>, names: &[&str]) {
        for name in names {
            let o = org(name);
            Api::<Organization>::all(Arc::clone(store)).create(&o).await.unwrap();
            Api::<ClusterRole>::all(Arc::clone(store))
                .create(&admin_cluster_role(&o))
                .await
                .unwrap();
        }
    }

    async fn rules_of(store: &Arc<dyn ObjectStore>, org: &str) -> Vec<PolicyRule> {
        Api::<ClusterRole>::all(Arc::clone(store))
            .get(&admin_cluster_role_name(org))
            .await
            .unwrap()
            .rules
    }

    fn fed(members: &[&str]) -> Federation {
        let mut ms: Vec<Member> = members.iter().map(|m| Member::new(*m)).collect();
        ms[0].initiator = true;
        Federation::new(
            "fed1",
            FederationSpec {
                members: ms,
                policy: Some(Policy::All),
                description: String::new(),
            },
        )
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        seed(&store, &["org1", "org2"]).await;
        let sync = RbacSync::new(Arc::clone(&store), 3);
        let target = Target::federation(&fed(&["org1", "org2"]));
        sync.reconcile(&target, RbacAction::Create).await.unwrap();
        sync.reconcile(&target, RbacAction::Create).await.unwrap();

        let rule = target_rule("federations", "fed1");
        let count = rules_of(&store, "org1").await.iter().filter(|r| **r == rule).count();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_update_removes_from_former_members() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        seed(&store, &["org1", "org2", "org3"]).await;
        let sync = RbacSync::new(Arc::clone(&store), 3);
        sync.reconcile(&Target::federation(&fed(&["org1", "org2"])), RbacAction::Create)
            .await
            .unwrap();
        sync.reconcile(&Target::federation(&fed(&["org1", "org3"])), RbacAction::Update)
            .await
            .unwrap();

        let rule = target_rule("federations", "fed1");
        assert!(rules_of(&store, "org1").await.contains(&rule));
        assert!(!rules_of(&store, "org2").await.contains(&rule));
        assert!(rules_of(&store, "org3").await.contains(&rule));

        sync.reconcile(&Target::federation(&fed(&["org1", "org3"])), RbacAction::Delete)
            .await
            .unwrap();
        for o in ["org1", "org2", "org3"] {
            assert!(!rules_of(&store, o).await.contains(&rule));
            assert_eq!(rules_of(&store, o).await.len(), admin_base_rules(o).len());
        }
    }

    #[tokio::test]
    async fn test_missing_role_fails_create_but_not_delete() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let sync = RbacSync::new(Arc::clone(&store), 3);
        let target = Target::federation(&fed(&["ghost"]));
        assert!(sync.reconcile(&target, RbacAction::Create).await.is_err());
        sync.reconcile(&target, RbacAction::Delete).await.unwrap();
    }

    #[test]
    fn test_rule_helpers() {
        let mut rules = Vec::new();
        let rule = target_rule("channels", "ch1");
        assert!(ensure_rule(&mut rules, &rule));
        assert!(!ensure_rule(&mut rules, &rule));
        assert!(remove_rule(&mut rules, &rule));
        assert!(rules.is_empty());
    }
}
