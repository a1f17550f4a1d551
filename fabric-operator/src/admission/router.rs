//! Path-based dispatch of admission reviews.
//!
//! Each kind answers at `/mutate-<group>-<version>-<kind>` and
//! `/validate-<group>-<version>-<kind>`, with dots and slashes of the
//! apiVersion turned into dashes and the kind lowercased.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use super::chaincode::{ChaincodeBuildWebhook, ChaincodeWebhook, EndorsePolicyWebhook};
use super::channel::ChannelWebhook;
use super::errors::AdmissionError;
use super::federation::FederationWebhook;
use super::network::NetworkWebhook;
use super::organization::OrganizationWebhook;
use super::proposal::{ProposalWebhook, VoteWebhook};
use super::review::{AdmissionResponse, AdmissionReview};
use super::webhook::{Handler, Typed};
use crate::controller::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Mutate,
    Validate,
}

impl Mode {
    fn prefix(self) -> &'static str {
        match self {
            Mode::Mutate => "mutate",
            Mode::Validate => "validate",
        }
    }
}

pub fn webhook_path(mode: Mode, api_version: &str, kind: &str) -> String {
    format!(
        "/{}-{}-{}",
        mode.prefix(),
        api_version.replace(['.', '/'], "-"),
        kind.to_lowercase()
    )
}

struct Route {
    mode: Mode,
    handler: Arc<dyn Handler>,
}

#[derive(Default)]
pub struct Router {
    routes: HashMap<String, Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register both paths of `handler`.
    pub fn register(mut self, handler: Arc<dyn Handler>) -> Self {
        for mode in [Mode::Mutate, Mode::Validate] {
            let path = webhook_path(mode, handler.api_version(), handler.kind());
            self.routes.insert(
                path,
                Route {
                    mode,
                    handler: Arc::clone(&handler),
                },
            );
        }
        self
    }

    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// Answer `review` for `path`. `None` when nothing is registered there.
    pub async fn review(&self, ctx: &Context, path: &str, review: AdmissionReview) -> Option<AdmissionReview> {
        let route = self.routes.get(path)?;
        let response = match &review.request {
            Some(req) => match route.mode {
                Mode::Mutate => route.handler.mutate(ctx, req).await,
                Mode::Validate => route.handler.validate(ctx, req).await,
            },
            None => {
                warn!(path, "admission review without a request");
                AdmissionResponse::deny("", &AdmissionError::Invalid("review carries no request".into()))
            }
        };
        Some(review.respond(response))
    }
}

/// Router with every kind's webhooks.
pub fn webhooks() -> Router {
    Router::new()
        .register(Arc::new(Typed(OrganizationWebhook)))
        .register(Arc::new(Typed(FederationWebhook)))
        .register(Arc::new(Typed(NetworkWebhook)))
        .register(Arc::new(Typed(ChannelWebhook)))
        .register(Arc::new(Typed(EndorsePolicyWebhook)))
        .register(Arc::new(Typed(ChaincodeWebhook)))
        .register(Arc::new(Typed(ChaincodeBuildWebhook)))
        .register(Arc::new(Typed(ProposalWebhook)))
        .register(Arc::new(Typed(VoteWebhook)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::review::{AdmissionRequest, GroupVersionKind, Operation};
    use crate::admission::UserInfo;
    use crate::fixtures::Fixture;
    use serde_json::json;

    fn request(operation: Operation, object: serde_json::Value, old: Option<serde_json::Value>) -> AdmissionReview {
        AdmissionReview {
            api_version: "admission.k8s.io/v1".into(),
            kind: "AdmissionReview".into(),
            request: Some(AdmissionRequest {
                uid: "req-1".into(),
                kind: GroupVersionKind {
                    group: "ibp.com".into(),
                    version: "v1beta1".into(),
                    kind: "Proposal".into(),
                },
                name: "p1".into(),
                namespace: None,
                operation,
                user_info: UserInfo::named("org1-admin"),
                object: Some(object),
                old_object: old,
                dry_run: false,
            }),
            response: None,
        }
    }

    fn proposal(intent: serde_json::Value) -> serde_json::Value {
        let mut spec = json!({"federation": "fed1", "policy": "ALL"});
        spec.as_object_mut().unwrap().extend(intent.as_object().unwrap().clone());
        json!({"apiVersion": "ibp.com/v1beta1", "kind": "Proposal", "metadata": {"name": "p1"}, "spec": spec})
    }

    #[test]
    fn test_paths_cover_every_kind() {
        let router = webhooks();
        assert_eq!(router.paths().len(), 18);
        assert!(router.paths().contains(&"/validate-ibp-com-v1beta1-chaincodebuild"));
        assert!(router.paths().contains(&"/mutate-ibp-com-v1beta1-endorsepolicy"));
    }

    #[tokio::test]
    async fn test_mutation_answers_with_json_patch() {
        let fx = Fixture::new().await;
        let review = request(Operation::Create, proposal(json!({"dissolveFederation": {}})), None);
        let out = webhooks()
            .review(&fx.ctx, "/mutate-ibp-com-v1beta1-proposal", review)
            .await
            .unwrap();
        let resp = out.response.unwrap();
        assert!(resp.allowed);
        assert_eq!(resp.uid, "req-1");
        let paths: Vec<String> = resp
            .patch_ops()
            .iter()
            .map(|op| op["path"].as_str().unwrap().to_string())
            .collect();
        assert!(paths.contains(&"/spec/startAt".to_string()));
        assert!(paths.contains(&"/spec/endAt".to_string()));
    }

    #[tokio::test]
    async fn test_validation_denial_carries_reason() {
        let fx = Fixture::new().await;
        let old = proposal(json!({"dissolveFederation": {}}));
        let new = proposal(json!({"addMember": {"members": ["org3"]}}));
        let out = webhooks()
            .review(
                &fx.ctx,
                "/validate-ibp-com-v1beta1-proposal",
                request(Operation::Update, new, Some(old)),
            )
            .await
            .unwrap();
        let resp = out.response.unwrap();
        assert!(!resp.allowed);
        assert_eq!(resp.status.unwrap().reason, "ErrChangeProposalPurpose");
    }

    #[tokio::test]
    async fn test_unknown_path_is_unrouted() {
        let fx = Fixture::new().await;
        let review = request(Operation::Create, json!({}), None);
        assert!(webhooks().review(&fx.ctx, "/validate-ibp-com-v1beta1-peer", review).await.is_none());
    }
}
