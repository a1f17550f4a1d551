//! ChaincodeBuild reconciler.
//!
//! Materializes the source workspace volume and the pipeline run in the
//! initiator's namespace, then copies the run's results into the status.
//! A build is ready once both image results are present.

use async_trait::async_trait;
use fabric_api::chaincode_build::{pipeline_run_name, source_workspace_name};
use fabric_api::labels::{
    operator_labels, CHAINCODE_BUILD_ID, CHAINCODE_BUILD_INITIATOR, CHAINCODE_BUILD_NETWORK,
    CHAINCODE_BUILD_VERSION,
};
use fabric_api::platform::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PipelineRun, PipelineRunSpec, WorkspaceBinding,
};
use fabric_api::status::StatusType;
use fabric_api::{ChaincodeBuild, ErrorCode, HasStatus, ObjectMeta, Resource};
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::adopt;
use crate::controller::{settle, Action, Context, Reconciler, Update};
use crate::error::{OperatorError, Result};

/// Pipeline every build runs.
pub const PIPELINE: &str = "chaincode-build";

/// Workspace the pipeline checks sources out into.
pub const SOURCE_WORKSPACE: &str = "source-ws";

const SOURCE_VOLUME_SIZE: &str = "1Gi";

pub struct ChaincodeBuildReconciler;

impl ChaincodeBuildReconciler {
    async fn ensure_workspace(&self, ctx: &Context, build: &ChaincodeBuild) -> Result<String> {
        let namespace = &build.spec.initiator;
        let name = source_workspace_name(build.name());
        let pvcs = ctx.namespaced::<PersistentVolumeClaim>(namespace);
        if pvcs.get_opt(&name).await?.is_some() {
            return Ok(name);
        }
        let mut pvc = PersistentVolumeClaim {
            metadata: ObjectMeta::namespaced(namespace, &name),
            spec: PersistentVolumeClaimSpec {
                access_modes: vec!["ReadWriteOnce".to_string()],
                storage: SOURCE_VOLUME_SIZE.to_string(),
                storage_class_name: None,
            },
        };
        pvc.metadata.labels = operator_labels(&ctx.config.label_prefix, build.name());
        adopt(&mut pvc.metadata, build);
        match pvcs.create(&pvc).await {
            Ok(_) => {
                info!(build = %build.name(), namespace = %namespace, "source workspace created");
                Ok(name)
            }
            Err(e) if e.is_already_exists() => Ok(name),
            Err(e) => Err(OperatorError::from_store(e, ErrorCode::InvalidPvcCreateRequest)),
        }
    }

    /// Get or create the pipeline run. `None` when the build source is not
    /// exactly one of git or minio.
    async fn ensure_run(&self, ctx: &Context, build: &ChaincodeBuild, volume: &str) -> Result<Option<PipelineRun>> {
        let namespace = &build.spec.initiator;
        let runs = ctx.namespaced::<PipelineRun>(namespace);
        let name = pipeline_run_name(build.name());
        if let Some(run) = runs.get_opt(&name).await? {
            return Ok(Some(run));
        }
        let Some(params) = build.spec.pipeline_run_spec.params() else {
            return Ok(None);
        };
        let mut run = PipelineRun {
            metadata: ObjectMeta::namespaced(namespace, &name),
            spec: PipelineRunSpec {
                pipeline_ref: PIPELINE.to_string(),
                params,
                workspaces: vec![WorkspaceBinding {
                    name: SOURCE_WORKSPACE.to_string(),
                    persistent_volume_claim: volume.to_string(),
                }],
            },
            status: None,
        };
        run.metadata.labels = operator_labels(&ctx.config.label_prefix, build.name());
        adopt(&mut run.metadata, build);
        match runs.create(&run).await {
            Ok(created) => {
                info!(build = %build.name(), run = %name, "pipeline run created");
                Ok(Some(created))
            }
            Err(e) if e.is_already_exists() => Ok(Some(runs.get(&name).await?)),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Reconciler for ChaincodeBuildReconciler {
    type Kind = ChaincodeBuild;

    fn labels(&self, ctx: &Context, build: &ChaincodeBuild) -> BTreeMap<String, String> {
        let mut labels = operator_labels(&ctx.config.label_prefix, build.name());
        labels.insert(CHAINCODE_BUILD_NETWORK.to_string(), build.spec.network.clone());
        labels.insert(CHAINCODE_BUILD_ID.to_string(), build.spec.id.clone());
        labels.insert(CHAINCODE_BUILD_VERSION.to_string(), build.spec.version.clone());
        labels.insert(CHAINCODE_BUILD_INITIATOR.to_string(), build.spec.initiator.clone());
        labels
    }

    fn diff(&self, old: &ChaincodeBuild, new: &ChaincodeBuild) -> Update {
        if old.spec == new.spec {
            return Update::default();
        }
        Update {
            spec_updated: true,
            pipeline_spec_updated: old.spec.pipeline_run_spec != new.spec.pipeline_run_spec,
            ..Default::default()
        }
    }

    async fn reconcile(&self, ctx: &Context, build: &mut ChaincodeBuild, _update: Update) -> Result<Action> {
        if build.is_ready() {
            return Ok(Action::Done);
        }
        let volume = self.ensure_workspace(ctx, build).await?;
        let Some(run) = self.ensure_run(ctx, build, &volume).await? else {
            warn!(build = %build.name(), "build source must be exactly one of git or minio");
            let status = build.status_or_default();
            settle(
                &mut status.cr,
                StatusType::Error,
                "InvalidPipelineSource",
                "exactly one of git or minio must be set",
            );
            return Ok(Action::Done);
        };

        let name = build.name().to_string();
        let status = build.status_or_default();
        if !run.is_completed() {
            settle(&mut status.cr, StatusType::Deploying, "PipelineRunning", "");
            return Ok(Action::Done);
        }
        status.pipeline_run_results = run.status.map(|s| s.pipeline_results).unwrap_or_default();
        if build.is_ready() {
            info!(build = %name, "chaincode image built");
            settle(&mut build.status_or_default().cr, StatusType::Created, "ChaincodeBuildReady", "");
        } else {
            warn!(build = %name, "pipeline run completed without image results");
            settle(
                &mut build.status_or_default().cr,
                StatusType::Deploying,
                "PipelineRunWithoutImage",
                "pipeline run completed without image results",
            );
        }
        Ok(Action::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Fixture;
    use fabric_api::chaincode_build::{
        ChaincodeBuildSpec, DockerBuild, GitSource, PipelineRunSource, RESULT_IMAGE_DIGEST, RESULT_IMAGE_URL,
    };
    use fabric_api::platform::{Param, PipelineRunCondition, PipelineRunStatus};

    fn build() -> ChaincodeBuild {
        ChaincodeBuild::new(
            "b1",
            ChaincodeBuildSpec {
                network: "neta".into(),
                id: "cc".into(),
                version: "1.0".into(),
                initiator: "org1".into(),
                pipeline_run_spec: PipelineRunSource {
                    git: Some(GitSource {
                        url: "https://example.com/cc.git".into(),
                        reference: "main".into(),
                    }),
                    minio: None,
                    dockerbuild: DockerBuild {
                        app_image: "registry/cc".into(),
                        ..Default::default()
                    },
                },
            },
        )
    }

    #[tokio::test]
    async fn test_workspace_and_run_in_initiator_namespace() {
        let fx = Fixture::new().await;
        let mut b = fx.ctx.api::<ChaincodeBuild>().create(&build()).await.unwrap();
        ChaincodeBuildReconciler.reconcile(&fx.ctx, &mut b, Update::full()).await.unwrap();

        let pvc: PersistentVolumeClaim = fx.get(Some("org1"), "b1-source-ws").await;
        assert_eq!(pvc.spec.access_modes, vec!["ReadWriteOnce".to_string()]);
        assert!(pvc.metadata.is_owned_by(ChaincodeBuild::KIND, "b1"));

        let run: PipelineRun = fx.get(Some("org1"), "b1-pipelinerun").await;
        assert_eq!(run.spec.pipeline_ref, PIPELINE);
        assert_eq!(run.spec.workspaces[0].persistent_volume_claim, "b1-source-ws");
        assert!(run.spec.params.contains(&Param::new("SOURCE", "git")));
        assert!(b.status.as_ref().unwrap().cr.is(StatusType::Deploying));
        assert!(!b.is_ready());
    }

    #[tokio::test]
    async fn test_completed_run_makes_build_ready() {
        let fx = Fixture::new().await;
        let mut b = fx.ctx.api::<ChaincodeBuild>().create(&build()).await.unwrap();
        ChaincodeBuildReconciler.reconcile(&fx.ctx, &mut b, Update::full()).await.unwrap();

        let runs = fx.ctx.namespaced::<PipelineRun>("org1");
        let mut run = runs.get("b1-pipelinerun").await.unwrap();
        run.status = Some(PipelineRunStatus {
            conditions: vec![PipelineRunCondition {
                condition_type: "Succeeded".into(),
                status: "True".into(),
                reason: "Completed".into(),
                ..Default::default()
            }],
            pipeline_results: vec![
                Param::new(RESULT_IMAGE_URL, "registry/cc:1.0"),
                Param::new(RESULT_IMAGE_DIGEST, "sha256:feed"),
            ],
        });
        runs.update_status(&run).await.unwrap();

        ChaincodeBuildReconciler.reconcile(&fx.ctx, &mut b, Update::default()).await.unwrap();
        assert!(b.is_ready());
        assert_eq!(b.image(), Some(("registry/cc:1.0".to_string(), "sha256:feed".to_string())));
        assert!(b.status.as_ref().unwrap().cr.is(StatusType::Created));
    }

    #[tokio::test]
    async fn test_ambiguous_source_is_reported() {
        let fx = Fixture::new().await;
        let mut b = build();
        b.spec.pipeline_run_spec.minio = Some(Default::default());
        ChaincodeBuildReconciler.reconcile(&fx.ctx, &mut b, Update::full()).await.unwrap();
        assert!(b.status.as_ref().unwrap().cr.is(StatusType::Error));
        assert!(fx.ctx.namespaced::<PipelineRun>("org1").get_opt("b1-pipelinerun").await.unwrap().is_none());
    }
}
