//! Per-kind webhook trait and the untyped handler the router dispatches to.

use async_trait::async_trait;
use fabric_api::labels::LabelSelector;
use fabric_api::{Organization, Resource};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, info};

use super::errors::{AdmissionError, AdmissionResult};
use super::review::{json_patch, AdmissionRequest, AdmissionResponse, Operation};
use super::user::{is_super_user, UserInfo};
use crate::controller::Context;

/// The principal behind a request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user: UserInfo,
    pub super_user: bool,
}

impl Caller {
    pub fn new(ctx: &Context, user: UserInfo) -> Self {
        let super_user = is_super_user(&user, &ctx.config);
        Self { user, super_user }
    }

    pub fn name(&self) -> &str {
        &self.user.username
    }

    /// Fails unless the caller is a super-user or `admin`.
    pub fn require(&self, admin: &str, what: impl FnOnce() -> String) -> AdmissionResult<()> {
        if self.super_user || self.user.username == admin {
            return Ok(());
        }
        Err(AdmissionError::NoPermission(format!("{} may not {}", self.name(), what())))
    }

    /// Fails unless the caller administers `org`.
    pub async fn require_admin_of(&self, ctx: &Context, org: &str) -> AdmissionResult<()> {
        if self.super_user {
            return Ok(());
        }
        let organization = ctx.api::<Organization>().get(org).await?;
        self.require(&organization.spec.admin, || format!("act for organization {}", org))
    }

    /// Organizations whose admin is the caller.
    pub async fn administered(&self, ctx: &Context) -> AdmissionResult<BTreeSet<String>> {
        let orgs = ctx.api::<Organization>().list(&LabelSelector::everything()).await?;
        Ok(orgs
            .into_iter()
            .filter(|o| o.spec.admin == self.user.username)
            .map(|o| o.metadata.name)
            .collect())
    }
}

/// Admission rules for one kind. Every hook defaults to admitting.
#[async_trait]
pub trait Webhook: Send + Sync + 'static {
    type Kind: Resource;

    async fn default(&self, _ctx: &Context, _caller: &Caller, _obj: &mut Self::Kind) -> AdmissionResult<()> {
        Ok(())
    }

    async fn validate_create(&self, _ctx: &Context, _caller: &Caller, _obj: &Self::Kind) -> AdmissionResult<()> {
        Ok(())
    }

    async fn validate_update(
        &self,
        _ctx: &Context,
        _caller: &Caller,
        _old: &Self::Kind,
        _new: &Self::Kind,
    ) -> AdmissionResult<()> {
        Ok(())
    }

    async fn validate_delete(&self, _ctx: &Context, _caller: &Caller, _obj: &Self::Kind) -> AdmissionResult<()> {
        Ok(())
    }
}

/// Object-safe view of a [`Webhook`].
#[async_trait]
pub trait Handler: Send + Sync {
    fn kind(&self) -> &'static str;
    fn api_version(&self) -> &'static str;

    async fn mutate(&self, ctx: &Context, req: &AdmissionRequest) -> AdmissionResponse;
    async fn validate(&self, ctx: &Context, req: &AdmissionRequest) -> AdmissionResponse;
}

pub struct Typed<W>(pub W);

fn decode<K: Resource>(value: Option<&Value>, field: &str) -> AdmissionResult<K> {
    let value = value.ok_or_else(|| AdmissionError::Invalid(format!("request has no {}", field)))?;
    Ok(serde_json::from_value(value.clone())?)
}

impl<W: Webhook> Typed<W> {
    async fn run_default(&self, ctx: &Context, req: &AdmissionRequest) -> AdmissionResult<Vec<Value>> {
        if !matches!(req.operation, Operation::Create | Operation::Update) {
            return Ok(Vec::new());
        }
        let caller = Caller::new(ctx, req.user_info.clone());
        let original: W::Kind = decode(req.object.as_ref(), "object")?;
        let mut defaulted = original.clone();
        self.0.default(ctx, &caller, &mut defaulted).await?;
        Ok(json_patch(&serde_json::to_value(&original)?, &serde_json::to_value(&defaulted)?))
    }

    async fn run_validate(&self, ctx: &Context, req: &AdmissionRequest) -> AdmissionResult<()> {
        let caller = Caller::new(ctx, req.user_info.clone());
        match req.operation {
            Operation::Create => {
                let obj: W::Kind = decode(req.object.as_ref(), "object")?;
                self.0.validate_create(ctx, &caller, &obj).await
            }
            Operation::Update => {
                let old: W::Kind = decode(req.old_object.as_ref(), "oldObject")?;
                let new: W::Kind = decode(req.object.as_ref(), "object")?;
                self.0.validate_update(ctx, &caller, &old, &new).await
            }
            Operation::Delete => {
                let obj: W::Kind = decode(req.old_object.as_ref().or(req.object.as_ref()), "oldObject")?;
                self.0.validate_delete(ctx, &caller, &obj).await
            }
            Operation::Connect => Ok(()),
        }
    }
}

fn log_denied(kind: &str, req: &AdmissionRequest, err: &AdmissionError) {
    info!(
        kind,
        name = %req.name,
        operation = ?req.operation,
        user = %req.user_info.username,
        reason = err.reason(),
        "admission denied: {}",
        err
    );
}

#[async_trait]
impl<W: Webhook> Handler for Typed<W> {
    fn kind(&self) -> &'static str {
        W::Kind::KIND
    }

    fn api_version(&self) -> &'static str {
        W::Kind::API_VERSION
    }

    async fn mutate(&self, ctx: &Context, req: &AdmissionRequest) -> AdmissionResponse {
        match self.run_default(ctx, req).await {
            Ok(ops) => {
                debug!(kind = W::Kind::KIND, name = %req.name, ops = ops.len(), "defaulted");
                AdmissionResponse::allow(&req.uid).with_patch(ops)
            }
            Err(err) => {
                log_denied(W::Kind::KIND, req, &err);
                AdmissionResponse::deny(&req.uid, &err)
            }
        }
    }

    async fn validate(&self, ctx: &Context, req: &AdmissionRequest) -> AdmissionResponse {
        match self.run_validate(ctx, req).await {
            Ok(()) => {
                debug!(kind = W::Kind::KIND, name = %req.name, operation = ?req.operation, "admitted");
                AdmissionResponse::allow(&req.uid)
            }
            Err(err) => {
                log_denied(W::Kind::KIND, req, &err);
                AdmissionResponse::deny(&req.uid, &err)
            }
        }
    }
}
