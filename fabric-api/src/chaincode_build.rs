//! ChaincodeBuild: an immutable record of one chaincode image build.

use serde::{Deserialize, Serialize};

use crate::custom_resource;
use crate::platform::Param;
use crate::status::{CrStatus, StatusEnvelope};

pub const RESULT_IMAGE_URL: &str = "IMAGE_URL";
pub const RESULT_IMAGE_DIGEST: &str = "IMAGE_DIGEST";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSource {
    pub url: String,
    #[serde(default)]
    pub reference: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinioSource {
    pub host: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    pub bucket: String,
    pub object: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerBuild {
    pub app_image: String,
    #[serde(default)]
    pub dockerfile: String,
    #[serde(default)]
    pub context: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minio: Option<MinioSource>,
    pub dockerbuild: DockerBuild,
}

impl PipelineRunSource {
    /// Pipeline parameters describing this source and docker build.
    /// `None` unless exactly one of git or minio is set.
    pub fn params(&self) -> Option<Vec<Param>> {
        let mut params = match (&self.git, &self.minio) {
            (Some(git), None) => vec![
                Param::new("SOURCE", "git"),
                Param::new("SOURCE_GIT_URL", &git.url),
                Param::new("SOURCE_GIT_REFERENCE", &git.reference),
            ],
            (None, Some(minio)) => vec![
                Param::new("SOURCE", "minio"),
                Param::new("SOURCE_MINIO_HOST", &minio.host),
                Param::new("SOURCE_MINIO_ACCESS_KEY", &minio.access_key),
                Param::new("SOURCE_MINIO_SECRET_KEY", &minio.secret_key),
                Param::new("SOURCE_MINIO_BUCKET", &minio.bucket),
                Param::new("SOURCE_MINIO_OBJECT", &minio.object),
            ],
            _ => return None,
        };
        params.push(Param::new("APP_IMAGE", &self.dockerbuild.app_image));
        params.push(Param::new("DOCKERFILE", &self.dockerbuild.dockerfile));
        params.push(Param::new("CONTEXT", &self.dockerbuild.context));
        Some(params)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaincodeBuildSpec {
    pub network: String,
    pub id: String,
    pub version: String,
    /// Organization that requested the build.
    pub initiator: String,
    pub pipeline_run_spec: PipelineRunSource,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaincodeBuildStatus {
    #[serde(flatten)]
    pub cr: CrStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipeline_run_results: Vec<Param>,
}

impl StatusEnvelope for ChaincodeBuildStatus {
    fn envelope(&self) -> &CrStatus {
        &self.cr
    }

    fn envelope_mut(&mut self) -> &mut CrStatus {
        &mut self.cr
    }
}

custom_resource! {
    ChaincodeBuild { spec: ChaincodeBuildSpec, status: ChaincodeBuildStatus, kind: "ChaincodeBuild", plural: "chaincodebuilds", namespaced: false }
}

impl ChaincodeBuild {
    pub fn result(&self, name: &str) -> Option<&str> {
        self.status.as_ref().and_then(|s| {
            s.pipeline_run_results
                .iter()
                .find(|p| p.name == name)
                .map(|p| p.value.as_str())
        })
    }

    /// Ready once both the image URL and digest results are non-empty.
    pub fn is_ready(&self) -> bool {
        let present = |n| self.result(n).map(|v| !v.is_empty()).unwrap_or(false);
        present(RESULT_IMAGE_URL) && present(RESULT_IMAGE_DIGEST)
    }

    pub fn image(&self) -> Option<(String, String)> {
        if !self.is_ready() {
            return None;
        }
        Some((
            self.result(RESULT_IMAGE_URL)?.to_string(),
            self.result(RESULT_IMAGE_DIGEST)?.to_string(),
        ))
    }

    /// `(network, id, version)` uniqueness key.
    pub fn identity(&self) -> (&str, &str, &str) {
        (&self.spec.network, &self.spec.id, &self.spec.version)
    }
}

pub fn source_workspace_name(build: &str) -> String {
    format!("{}-source-ws", build)
}

pub fn pipeline_run_name(build: &str) -> String {
    format!("{}-pipelinerun", build)
}
