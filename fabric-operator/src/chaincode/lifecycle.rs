//! Chaincode lifecycle engine.
//!
//! An approved chaincode advances one stage per pass along
//! `Packaged → Installed → Approved → Committed → Running`. Each outcome is
//! appended to the condition ring; a failed stage records an `Error` entry
//! naming itself as the resume point, so the next pass retries exactly that
//! stage.

use fabric_api::chaincode::{pod_name, ChaincodeCondition, ChaincodeImage};
use fabric_api::meta::NamespacedName;
use fabric_api::platform::Pod;
use fabric_api::status::StatusType;
use fabric_api::{
    Chaincode, ChaincodeBuild, ChaincodePhase, ChaincodeStage, Channel, EndorsePolicy, HasStatus, Resource,
};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::package;
use crate::controller::{settle, Action, Context};
use crate::error::{OperatorError, Result};
use crate::sdk::{
    admin_identity, node_endpoint, orderer_endpoint, ChaincodeDefinition, Endpoint, Identity,
    ENDORSEMENT_PLUGIN, VALIDATION_PLUGIN,
};

/// Approvals needed to commit among `members` organizations.
pub fn majority(members: usize) -> usize {
    members / 2 + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstallOutcome {
    Installed,
    Failed,
    QueryFailed,
}

impl InstallOutcome {
    fn as_str(self) -> &'static str {
        match self {
            InstallOutcome::Installed => "Installed",
            InstallOutcome::Failed => "Failed",
            InstallOutcome::QueryFailed => "QueryFailed",
        }
    }
}

/// A joined peer with the identity that administers it.
struct Target {
    peer: NamespacedName,
    endpoint: Endpoint,
    admin: Identity,
}

/// Everything a stage needs, resolved once per pass.
struct Stage<'a> {
    ctx: &'a Context,
    cc: &'a Chaincode,
}

impl<'a> Stage<'a> {
    fn store(&self) -> &Arc<dyn crate::store::ObjectStore> {
        &self.ctx.store
    }

    async fn channel(&self) -> Result<Channel> {
        Ok(self.ctx.api::<Channel>().get(&self.cc.spec.channel).await?)
    }

    fn path(&self) -> PathBuf {
        package::package_path(
            &self.ctx.config.store,
            &self.cc.spec.channel,
            self.cc.name(),
            &self.cc.spec.id,
            &self.cc.spec.version,
        )
    }

    /// Image to package: the build's results for externally built chaincode,
    /// otherwise the declared image.
    async fn image(&self) -> Result<ChaincodeImage> {
        let Some(build) = &self.cc.spec.external_builder else {
            return Ok(self.cc.spec.images.clone());
        };
        let build = self.ctx.api::<ChaincodeBuild>().get(build).await?;
        let (name, digest) = build.image().ok_or_else(|| {
            OperatorError::InvalidState(format!("chaincodebuild {} has no image yet", build.name()))
        })?;
        Ok(ChaincodeImage {
            name,
            digest,
            pull_secret: self.cc.spec.images.pull_secret.clone(),
        })
    }

    /// Package bytes, rebuilt and rewritten when the stored file is missing.
    async fn package(&self) -> Result<(Vec<u8>, String)> {
        let path = self.path();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let bytes = package::build(&self.cc.spec.label, &self.image().await?)?;
                package::write(&path, &bytes).await?;
                bytes
            }
            Err(e) => return Err(e.into()),
        };
        let id = package::package_id(&self.cc.spec.label, &bytes);
        Ok((bytes, id))
    }

    async fn targets(&self, channel: &Channel) -> Result<Vec<Target>> {
        let mut targets = Vec::new();
        for peer in channel.joined_peers() {
            targets.push(Target {
                endpoint: node_endpoint(self.store(), &peer.namespace, &peer.name).await?,
                admin: admin_identity(self.store(), &peer.namespace).await?,
                peer,
            });
        }
        if targets.is_empty() {
            return Err(OperatorError::InvalidState(format!(
                "channel {} has no joined peers",
                channel.name()
            )));
        }
        Ok(targets)
    }

    async fn definition(&self, package_id: String) -> Result<ChaincodeDefinition> {
        let policy = self
            .ctx
            .api::<EndorsePolicy>()
            .get(&self.cc.spec.endorse_policy_ref.name)
            .await?;
        Ok(ChaincodeDefinition {
            name: self.cc.spec.id.clone(),
            version: self.cc.spec.version.clone(),
            package_id,
            sequence: self.cc.sequence(),
            endorsement_plugin: ENDORSEMENT_PLUGIN.to_string(),
            validation_plugin: VALIDATION_PLUGIN.to_string(),
            init_required: self.cc.spec.init_required,
            signature_policy: Some(policy.signature_policy()?),
        })
    }

    async fn run_package(&self) -> Result<String> {
        let image = self.image().await?;
        let bytes = package::build(&self.cc.spec.label, &image)?;
        let path = self.path();
        package::write(&path, &bytes).await?;
        Ok(format!(
            "package {} written to {}",
            package::package_id(&self.cc.spec.label, &bytes),
            path.display()
        ))
    }

    async fn install_one(&self, target: &Target, bytes: &[u8], id: &str) -> InstallOutcome {
        let sdk = &self.ctx.sdk;
        match sdk.lifecycle_query_installed(&target.endpoint, &target.admin, id).await {
            Ok(()) => return InstallOutcome::Installed,
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                warn!(peer = %target.peer, error = %e, "query installed failed");
                return InstallOutcome::QueryFailed;
            }
        }
        for attempt in 1..=self.ctx.config.install_retries.max(1) {
            match sdk
                .lifecycle_install(&target.endpoint, &target.admin, &self.cc.spec.label, bytes)
                .await
            {
                Ok(_) => return InstallOutcome::Installed,
                Err(e) => warn!(peer = %target.peer, attempt, error = %e, "install failed"),
            }
        }
        InstallOutcome::Failed
    }

    async fn run_install(&self) -> Result<String> {
        let channel = self.channel().await?;
        let targets = self.targets(&channel).await?;
        let (bytes, id) = self.package().await?;
        let outcomes = join_all(targets.iter().map(|t| self.install_one(t, &bytes, &id))).await;
        let mut lines = Vec::new();
        let mut failed = false;
        for (target, outcome) in targets.iter().zip(outcomes) {
            failed |= outcome != InstallOutcome::Installed;
            lines.push(format!(
                "org[{}] peer [{}] installation status {}",
                target.peer.namespace,
                target.peer.name,
                outcome.as_str()
            ));
        }
        let message = lines.join("; ");
        if failed {
            return Err(OperatorError::InvalidState(message));
        }
        Ok(message)
    }

    async fn run_approve(&self) -> Result<String> {
        let channel = self.channel().await?;
        let targets = self.targets(&channel).await?;
        let (_, id) = self.package().await?;
        let definition = self.definition(id).await?;
        let orderer = orderer_endpoint(self.store(), &channel.spec.network).await?;
        let sdk = &self.ctx.sdk;

        let mut approved = Vec::new();
        for member in &channel.spec.members {
            let Some(target) = targets.iter().find(|t| t.peer.namespace == member.name) else {
                debug!(org = %member.name, "no joined peer, skipping approval");
                continue;
            };
            match sdk
                .lifecycle_query_approved(
                    &channel.metadata.name,
                    &definition.name,
                    definition.sequence,
                    &target.endpoint,
                    &target.admin,
                )
                .await
            {
                Ok(state) if state.sequence == definition.sequence => {
                    approved.push(member.name.clone());
                    continue;
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
            sdk.lifecycle_approve(
                &channel.metadata.name,
                &definition,
                &target.endpoint,
                &orderer,
                &target.admin,
            )
            .await?;
            info!(chaincode = %self.cc.name(), org = %member.name, sequence = definition.sequence, "approved");
            approved.push(member.name.clone());
        }
        Ok(format!("approved by {}", approved.join(",")))
    }

    async fn readiness(&self, channel: &Channel, target: &Target, definition: &ChaincodeDefinition) -> Result<BTreeMap<String, bool>> {
        Ok(self
            .ctx
            .sdk
            .lifecycle_check_commit_readiness(&channel.metadata.name, definition, &target.endpoint, &target.admin)
            .await?)
    }

    async fn run_commit(&self) -> Result<String> {
        let channel = self.channel().await?;
        let targets = self.targets(&channel).await?;
        let (_, id) = self.package().await?;
        let definition = self.definition(id).await?;
        let anchor = &targets[0];

        let readiness = self.readiness(&channel, anchor, &definition).await?;
        let approvals = readiness.values().filter(|ok| **ok).count();
        let needed = majority(channel.spec.members.len());
        if approvals < needed {
            return Err(OperatorError::InvalidState(format!(
                "{} of {} approvals, {} needed",
                approvals,
                channel.spec.members.len(),
                needed
            )));
        }

        let sdk = &self.ctx.sdk;
        match sdk
            .lifecycle_query_committed(&channel.metadata.name, &definition.name, &anchor.endpoint, &anchor.admin)
            .await
        {
            Ok(state) if state.sequence >= definition.sequence => {
                return Ok(format!("sequence {} already committed", state.sequence));
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let orderer = orderer_endpoint(self.store(), &channel.spec.network).await?;
        let peers: Vec<Endpoint> = targets.iter().map(|t| t.endpoint.clone()).collect();
        sdk.lifecycle_commit(&channel.metadata.name, &definition, &peers, &orderer, &anchor.admin)
            .await?;
        Ok(format!("sequence {} committed with {} approvals", definition.sequence, approvals))
    }

    async fn run_running(&self) -> Result<String> {
        let channel = self.channel().await?;
        let targets = self.targets(&channel).await?;
        let (_, id) = self.package().await?;
        let definition = self.definition(id.clone()).await?;
        let readiness = self.readiness(&channel, &targets[0], &definition).await?;

        let mut running = 0;
        for target in &targets {
            if !readiness.get(&target.peer.namespace).copied().unwrap_or(false) {
                continue;
            }
            let name = pod_name(&target.peer.namespace, &target.peer.name, &id);
            let pod = self
                .ctx
                .namespaced::<Pod>(&target.peer.namespace)
                .get_opt(&name)
                .await?;
            if !pod.map(|p| p.is_running()).unwrap_or(false) {
                return Err(OperatorError::InvalidState(format!(
                    "chaincode pod {}/{} is not running",
                    target.peer.namespace, name
                )));
            }
            running += 1;
        }
        Ok(format!("{} chaincode pods running", running))
    }

    async fn run(&self, stage: ChaincodeStage) -> Result<String> {
        match stage {
            ChaincodeStage::Packaged => self.run_package().await,
            ChaincodeStage::Installed => self.run_install().await,
            ChaincodeStage::Approved => self.run_approve().await,
            ChaincodeStage::Committed => self.run_commit().await,
            ChaincodeStage::Running => self.run_running().await,
            ChaincodeStage::Done | ChaincodeStage::Error => Ok(String::new()),
        }
    }
}

/// Reason written with a successful stage.
fn success_reason(stage: ChaincodeStage) -> &'static str {
    match stage {
        ChaincodeStage::Packaged => "ChaincodePackaged",
        ChaincodeStage::Installed => "ChaincodeInstalled",
        ChaincodeStage::Approved => "ChaincodeApproved",
        ChaincodeStage::Committed => "ChaincodeCommitted",
        ChaincodeStage::Running => "ChaincodeRunning",
        ChaincodeStage::Done | ChaincodeStage::Error => "ChaincodeUpdated",
    }
}

/// Attempt the next stage of `cc`, recording the outcome in its status.
pub async fn advance(ctx: &Context, cc: &mut Chaincode) -> Result<Action> {
    let name = cc.name().to_string();
    match cc.phase() {
        ChaincodePhase::Pending | ChaincodePhase::Running => return Ok(Action::Done),
        ChaincodePhase::Unapproved => {
            info!(chaincode = %name, "chaincode was not approved, waiting for deletion");
            return Ok(Action::Done);
        }
        ChaincodePhase::Approved => {}
    }

    let stage = cc.next_stage();
    debug!(chaincode = %name, %stage, "lifecycle stage");
    let outcome = Stage { ctx, cc }.run(stage).await;

    let status = cc.status_or_default();
    match outcome {
        Ok(message) => {
            info!(chaincode = %name, %stage, %message, "stage complete");
            let done = stage == ChaincodeStage::Running;
            if done {
                status.phase = ChaincodePhase::Running;
                settle(&mut status.cr, StatusType::Deployed, success_reason(stage), message.clone());
            } else {
                settle(&mut status.cr, StatusType::Deploying, success_reason(stage), message.clone());
            }
            status.conditions.push(ChaincodeCondition::success(stage, message));
            Ok(if done { Action::Done } else { Action::Requeue })
        }
        Err(err) => {
            warn!(chaincode = %name, %stage, error = %err, "stage failed");
            settle(&mut status.cr, StatusType::Deploying, stage.failure_reason(), err.to_string());
            status.conditions.push(ChaincodeCondition::error(stage, err.to_string()));
            Ok(Action::RequeueAfter(ctx.config.lifecycle_retry_interval))
        }
    }
}
