//! Rules for endorsement policies, chaincodes and chaincode builds.

use async_trait::async_trait;
use fabric_api::labels::{LabelSelector, CHAINCODE_ENDORSEMENT_POLICY};
use fabric_api::{Chaincode, ChaincodeBuild, ChaincodePhase, Channel, EndorsePolicy, Resource};

use super::errors::{AdmissionError, AdmissionResult};
use super::webhook::{Caller, Webhook};
use crate::controller::Context;

async fn require_channel(ctx: &Context, channel: &str) -> AdmissionResult<()> {
    match ctx.api::<Channel>().get_opt(channel).await? {
        Some(_) => Ok(()),
        None => Err(AdmissionError::NotFound(format!("channel {}", channel))),
    }
}

pub struct EndorsePolicyWebhook;

impl EndorsePolicyWebhook {
    async fn check(ctx: &Context, ep: &EndorsePolicy) -> AdmissionResult<()> {
        ep.signature_policy()
            .map_err(|e| AdmissionError::Invalid(e.to_string()))?;
        require_channel(ctx, &ep.spec.channel).await
    }
}

#[async_trait]
impl Webhook for EndorsePolicyWebhook {
    type Kind = EndorsePolicy;

    async fn validate_create(&self, ctx: &Context, _caller: &Caller, ep: &EndorsePolicy) -> AdmissionResult<()> {
        Self::check(ctx, ep).await
    }

    async fn validate_update(
        &self,
        ctx: &Context,
        _caller: &Caller,
        _old: &EndorsePolicy,
        new: &EndorsePolicy,
    ) -> AdmissionResult<()> {
        Self::check(ctx, new).await
    }

    async fn validate_delete(&self, ctx: &Context, _caller: &Caller, ep: &EndorsePolicy) -> AdmissionResult<()> {
        let users = ctx
            .api::<Chaincode>()
            .list(&LabelSelector::eq(CHAINCODE_ENDORSEMENT_POLICY, ep.name()))
            .await?;
        if let Some(cc) = users.first() {
            return Err(AdmissionError::InUse(format!(
                "endorsement policy {} is used by chaincode {}",
                ep.name(),
                cc.name()
            )));
        }
        Ok(())
    }
}

pub struct ChaincodeWebhook;

impl ChaincodeWebhook {
    async fn check_refs(ctx: &Context, cc: &Chaincode) -> AdmissionResult<()> {
        require_channel(ctx, &cc.spec.channel).await?;
        let policy = &cc.spec.endorse_policy_ref.name;
        if ctx.api::<EndorsePolicy>().get_opt(policy).await?.is_none() {
            return Err(AdmissionError::NotFound(format!("endorsement policy {}", policy)));
        }
        Ok(())
    }
}

#[async_trait]
impl Webhook for ChaincodeWebhook {
    type Kind = Chaincode;

    async fn validate_create(&self, ctx: &Context, _caller: &Caller, cc: &Chaincode) -> AdmissionResult<()> {
        cc.spec
            .validate_label()
            .map_err(|e| AdmissionError::Invalid(e.to_string()))?;
        Self::check_refs(ctx, cc).await
    }

    async fn validate_update(&self, ctx: &Context, _caller: &Caller, _old: &Chaincode, new: &Chaincode) -> AdmissionResult<()> {
        new.spec
            .validate_label()
            .map_err(|e| AdmissionError::Invalid(e.to_string()))?;
        Self::check_refs(ctx, new).await
    }

    /// References are checked against the object being deleted as well.
    async fn validate_delete(&self, ctx: &Context, _caller: &Caller, cc: &Chaincode) -> AdmissionResult<()> {
        Self::check_refs(ctx, cc).await?;
        if cc.phase() != ChaincodePhase::Unapproved {
            return Err(AdmissionError::Invalid(format!(
                "chaincode {} can only be deleted once unapproved",
                cc.name()
            )));
        }
        Ok(())
    }
}

pub struct ChaincodeBuildWebhook;

#[async_trait]
impl Webhook for ChaincodeBuildWebhook {
    type Kind = ChaincodeBuild;

    async fn validate_create(&self, ctx: &Context, _caller: &Caller, build: &ChaincodeBuild) -> AdmissionResult<()> {
        if build.spec.pipeline_run_spec.params().is_none() {
            return Err(AdmissionError::Invalid(
                "pipeline source needs exactly one of git or minio".into(),
            ));
        }
        let builds = ctx.api::<ChaincodeBuild>().list(&LabelSelector::everything()).await?;
        if let Some(dup) = builds
            .iter()
            .find(|b| b.name() != build.name() && b.identity() == build.identity())
        {
            let (network, id, version) = build.identity();
            return Err(AdmissionError::Invalid(format!(
                "chaincode build {} already builds {}/{}:{}",
                dup.name(),
                network,
                id,
                version
            )));
        }
        Ok(())
    }

    async fn validate_update(
        &self,
        _ctx: &Context,
        _caller: &Caller,
        old: &ChaincodeBuild,
        new: &ChaincodeBuild,
    ) -> AdmissionResult<()> {
        if old.spec != new.spec {
            return Err(AdmissionError::Immutable("spec"));
        }
        Ok(())
    }

    async fn validate_delete(&self, ctx: &Context, _caller: &Caller, build: &ChaincodeBuild) -> AdmissionResult<()> {
        let chaincodes = ctx.api::<Chaincode>().list(&LabelSelector::everything()).await?;
        if let Some(cc) = chaincodes.iter().find(|cc| cc.references_build(build.name())) {
            return Err(AdmissionError::InUse(format!(
                "chaincode build {} is referenced by chaincode {}",
                build.name(),
                cc.name()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{super_caller, Fixture};
    use fabric_api::chaincode_build::{ChaincodeBuildSpec, DockerBuild, GitSource, PipelineRunSource};
    use fabric_api::HasStatus;

    async fn seed(fx: &Fixture) {
        fx.organization("org1").await;
        fx.network("net1", "fed1", &["org1"]).await;
        fx.channel("ch1", "net1", &["org1"], &[]).await;
        fx.endorse_policy("ep", "ch1", "OR('org1.member')").await;
    }

    fn build(name: &str, git: bool) -> ChaincodeBuild {
        ChaincodeBuild::new(
            name,
            ChaincodeBuildSpec {
                network: "net1".into(),
                id: "cc".into(),
                version: "1.0".into(),
                initiator: "org1".into(),
                pipeline_run_spec: PipelineRunSource {
                    git: git.then(|| GitSource {
                        url: "https://example.com/cc.git".into(),
                        reference: "main".into(),
                    }),
                    minio: None,
                    dockerbuild: DockerBuild {
                        app_image: "registry/cc:1.0".into(),
                        dockerfile: "Dockerfile".into(),
                        context: ".".into(),
                    },
                },
            },
        )
    }

    #[tokio::test]
    async fn test_endorse_policy_must_parse_and_name_a_channel() {
        let fx = Fixture::new().await;
        seed(&fx).await;
        let hook = EndorsePolicyWebhook;
        let ep: EndorsePolicy = fx.get(None, "ep").await;
        assert!(hook.validate_create(&fx.ctx, &super_caller(), &ep).await.is_ok());

        let mut broken = ep.clone();
        broken.spec.value = "OR('org1.member'".into();
        assert!(hook.validate_update(&fx.ctx, &super_caller(), &ep, &broken).await.is_err());

        let mut elsewhere = ep.clone();
        elsewhere.spec.channel = "ch9".into();
        let err = hook.validate_update(&fx.ctx, &super_caller(), &ep, &elsewhere).await.unwrap_err();
        assert!(matches!(err, AdmissionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_endorse_policy_in_use_cannot_be_deleted() {
        let fx = Fixture::new().await;
        seed(&fx).await;
        let ep: EndorsePolicy = fx.get(None, "ep").await;
        let mut cc = fx.chaincode("cc1", "ch1");
        cc.metadata
            .labels
            .insert(CHAINCODE_ENDORSEMENT_POLICY.to_string(), "ep".to_string());
        fx.ctx.api::<Chaincode>().create(&cc).await.unwrap();

        let err = EndorsePolicyWebhook
            .validate_delete(&fx.ctx, &super_caller(), &ep)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "errInUse");
    }

    #[tokio::test]
    async fn test_chaincode_delete_needs_unapproved() {
        let fx = Fixture::new().await;
        seed(&fx).await;
        let hook = ChaincodeWebhook;
        let mut cc = fx.chaincode("cc1", "ch1");
        assert!(hook.validate_create(&fx.ctx, &super_caller(), &cc).await.is_ok());
        assert!(hook.validate_delete(&fx.ctx, &super_caller(), &cc).await.is_err());

        cc.status_or_default().phase = ChaincodePhase::Unapproved;
        assert!(hook.validate_delete(&fx.ctx, &super_caller(), &cc).await.is_ok());

        let mut orphan = cc.clone();
        orphan.spec.endorse_policy_ref.name = "gone".into();
        assert!(hook.validate_delete(&fx.ctx, &super_caller(), &orphan).await.is_err());
    }

    #[tokio::test]
    async fn test_chaincode_label_is_checked() {
        let fx = Fixture::new().await;
        seed(&fx).await;
        let mut cc = fx.chaincode("cc1", "ch1");
        cc.spec.label = "-bad label".into();
        let err = ChaincodeWebhook
            .validate_create(&fx.ctx, &super_caller(), &cc)
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_build_identity_unique_and_spec_frozen() {
        let fx = Fixture::new().await;
        let hook = ChaincodeBuildWebhook;
        let first = build("b1", true);
        assert!(hook.validate_create(&fx.ctx, &super_caller(), &first).await.is_ok());
        assert!(hook.validate_create(&fx.ctx, &super_caller(), &build("b0", false)).await.is_err());

        fx.ctx.api::<ChaincodeBuild>().create(&first).await.unwrap();
        assert!(hook.validate_create(&fx.ctx, &super_caller(), &build("b2", true)).await.is_err());

        let mut bumped = first.clone();
        bumped.spec.version = "2.0".into();
        let err = hook.validate_update(&fx.ctx, &super_caller(), &first, &bumped).await.unwrap_err();
        assert!(matches!(err, AdmissionError::Immutable("spec")));
    }

    #[tokio::test]
    async fn test_referenced_build_cannot_be_deleted() {
        let fx = Fixture::new().await;
        seed(&fx).await;
        let b = build("b1", true);
        let mut cc = fx.chaincode("cc1", "ch1");
        cc.spec.external_builder = Some("b1".into());
        fx.ctx.api::<Chaincode>().create(&cc).await.unwrap();

        let hook = ChaincodeBuildWebhook;
        let err = hook.validate_delete(&fx.ctx, &super_caller(), &b).await.unwrap_err();
        assert_eq!(err.reason(), "errInUse");
        assert!(hook
            .validate_delete(&fx.ctx, &super_caller(), &build("b2", true))
            .await
            .is_ok());
    }
}
