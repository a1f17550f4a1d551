//! The reconciler shell shared by every kind.
//!
//! A [`Controller`] wraps one [`Reconciler`] and owns its update stack. It
//! turns watch events into masks, and runs a pass for a name: fetch, label
//! reconciliation, the kind's own reconcile, then the error or success
//! status path.

use async_trait::async_trait;
use chrono::Utc;
use fabric_api::labels::{contains_all, operator_labels};
use fabric_api::{HasSpec, HasStatus, ObjectKey, Resource};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::context::Context;
use super::offering::Offering;
use super::update::{Update, UpdateStack};
use crate::error::{Result, StoreError};
use crate::store::{Api, Subresource, WatchEvent, WatchEventType};

/// What to do with a name after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Done,
    Requeue,
    RequeueAfter(Duration),
}

#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    type Kind: Offering;

    /// Prefix of the spec mirror, for kinds that keep one.
    fn mirror_prefix(&self) -> Option<&'static str> {
        None
    }

    /// Labels the object must carry.
    fn labels(&self, ctx: &Context, obj: &Self::Kind) -> BTreeMap<String, String> {
        operator_labels(&ctx.config.label_prefix, obj.name())
    }

    /// Mask describing the change from `old` to `new`. Empty means no pass.
    fn diff(&self, old: &Self::Kind, new: &Self::Kind) -> Update {
        if old.spec() != new.spec() {
            Update::spec()
        } else {
            Update::default()
        }
    }

    async fn reconcile(&self, ctx: &Context, obj: &mut Self::Kind, update: Update) -> Result<Action>;

    /// Called once the object is gone.
    async fn cleanup(&self, _ctx: &Context, _obj: &Self::Kind) -> Result<()> {
        Ok(())
    }
}

/// Write `obj`'s status with compare-and-swap, retrying while nobody else
/// changed the status. `before` is the status the pass started from.
pub async fn write_status<K: Offering>(
    api: &Api<K>,
    obj: &mut K,
    before: Option<&K::Status>,
    retries: u32,
) -> Result<()> {
    for attempt in 0..retries.max(1) {
        match api.update_status(obj).await {
            Ok(written) => {
                obj.meta_mut().resource_version = written.meta().resource_version.clone();
                return Ok(());
            }
            Err(e) if e.is_conflict() => {
                let latest = api.get(obj.name()).await?;
                if latest.status() != before {
                    return Err(StoreError::Conflict(format!(
                        "status of {} changed during reconcile",
                        obj.key()
                    ))
                    .into());
                }
                debug!(key = %obj.key(), attempt, "retrying status write");
                obj.meta_mut().resource_version = latest.meta().resource_version.clone();
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(StoreError::Conflict(format!("status of {}: retries exhausted", obj.key())).into())
}

pub struct Controller<R: Reconciler> {
    reconciler: R,
    ctx: Context,
    stack: UpdateStack,
}

impl<R: Reconciler> Controller<R> {
    pub fn new(reconciler: R, ctx: Context) -> Self {
        Self {
            reconciler,
            ctx,
            stack: UpdateStack::new(),
        }
    }

    pub fn reconciler(&self) -> &R {
        &self.reconciler
    }

    pub fn stack(&self) -> &UpdateStack {
        &self.stack
    }

    fn api(&self, key: &ObjectKey) -> Api<R::Kind> {
        match &key.namespace {
            Some(ns) => self.ctx.namespaced(ns),
            None => self.ctx.api(),
        }
    }

    /// Mask for an object seen on an add event. Objects that already carry a
    /// status were reconciled before a restart: diff against the mirror.
    async fn restart_mask(&self, obj: &R::Kind) -> Result<Update> {
        if !obj.is_initialized() {
            return Ok(Update::full());
        }
        let Some(prefix) = self.reconciler.mirror_prefix() else {
            return Ok(Update::default());
        };
        let mirrored = self
            .ctx
            .mirror()
            .load::<<R::Kind as HasSpec>::Spec>(prefix, obj.name())
            .await?;
        Ok(match mirrored {
            Some(spec) => {
                let mut old = obj.clone();
                *old.spec_mut() = spec;
                self.reconciler.diff(&old, obj)
            }
            None => Update::full(),
        })
    }

    /// Predicate: record the mask for `event` and say whether the object
    /// needs a pass.
    pub async fn observe(&self, event: &WatchEvent) -> Result<Option<ObjectKey>> {
        let obj: R::Kind = serde_json::from_value(event.object.clone())?;
        let key = obj.key();
        match event.event_type {
            WatchEventType::Added => {
                let mask = self.restart_mask(&obj).await?;
                self.stack.push(&key, mask).await;
                Ok(Some(key))
            }
            WatchEventType::Modified => {
                let Some(old) = &event.old else {
                    return Ok(Some(key));
                };
                let old: R::Kind = serde_json::from_value(old.clone())?;
                let mask = self.reconciler.diff(&old, &obj);
                if mask.is_empty() {
                    return Ok(None);
                }
                self.stack.push(&key, mask).await;
                Ok(Some(key))
            }
            WatchEventType::Deleted => {
                self.stack.clear(&key).await;
                if let Some(prefix) = self.reconciler.mirror_prefix() {
                    self.ctx.mirror().delete(prefix, obj.name()).await?;
                }
                self.reconciler.cleanup(&self.ctx, &obj).await?;
                Ok(None)
            }
        }
    }

    /// One pass for `key`.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let api = self.api(key);
        let Some(mut obj) = api.get_opt(&key.name).await? else {
            debug!(key = %key, "object gone");
            self.stack.clear(key).await;
            return Ok(Action::Done);
        };

        let wanted = self.reconciler.labels(&self.ctx, &obj);
        if !contains_all(obj.labels(), &wanted) {
            obj.meta_mut().labels.extend(wanted);
            api.update(&obj).await?;
            debug!(key = %key, "labels reconciled");
            return Ok(Action::Requeue);
        }

        let mut update = self.stack.peek(key).await;
        if update.is_empty() && !obj.is_initialized() {
            update = Update::full();
        }
        let before = obj.status().cloned();
        debug!(key = %key, ?update, "reconcile start");

        let outcome = self.reconciler.reconcile(&self.ctx, &mut obj, update).await;
        let retries = self.ctx.config.status_patch_retries;
        match outcome {
            Err(err) => {
                obj.record_error(&err);
                obj.touch(Utc::now());
                if let Err(write_err) = write_status(&api, &mut obj, before.as_ref(), retries).await {
                    warn!(key = %key, error = %write_err, "failed to write error status");
                }
                if err.is_breaking() {
                    error!(key = %key, error = %err, "breaking reconcile error");
                    self.stack.pop(key).await;
                    Ok(Action::Done)
                } else {
                    warn!(key = %key, error = %err, "reconcile failed, will retry");
                    Err(err)
                }
            }
            Ok(action) => {
                if obj.status_changed(before.as_ref()) {
                    obj.touch(Utc::now());
                    write_status(&api, &mut obj, before.as_ref(), retries).await?;
                    info!(key = %key, "status updated");
                } else if let Some(patch) = obj.heartbeat(Utc::now()) {
                    match api.patch(&key.name, Subresource::Status, patch).await {
                        Ok(_) => {}
                        Err(e) if e.is_not_found() => return Ok(Action::Done),
                        Err(e) => return Err(e.into()),
                    }
                }

                if let Some(prefix) = self.reconciler.mirror_prefix() {
                    self.ctx.mirror().save(prefix, obj.name(), obj.spec()).await?;
                }

                let remaining = self.stack.pop(key).await;
                debug!(key = %key, remaining, "reconcile finished");
                if remaining > 0 {
                    return Ok(Action::Requeue);
                }
                Ok(action)
            }
        }
    }
}

/// Type-erased controller, as driven by the manager.
#[async_trait]
pub trait Runnable: Send + Sync {
    fn kind(&self) -> &'static str;

    fn namespaced(&self) -> bool;

    async fn observe(&self, event: &WatchEvent) -> Result<Option<ObjectKey>>;

    async fn run(&self, key: &ObjectKey) -> Result<Action>;
}

#[async_trait]
impl<R: Reconciler> Runnable for Controller<R> {
    fn kind(&self) -> &'static str {
        <R::Kind as Resource>::KIND
    }

    fn namespaced(&self) -> bool {
        <R::Kind as Resource>::NAMESPACED
    }

    async fn observe(&self, event: &WatchEvent) -> Result<Option<ObjectKey>> {
        Controller::observe(self, event).await
    }

    async fn run(&self, key: &ObjectKey) -> Result<Action> {
        self.reconcile(key).await
    }
}
