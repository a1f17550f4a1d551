//! The object store seam.
//!
//! The orchestrator's object store is an external collaborator. Everything the
//! operator needs from it is expressed by [`ObjectStore`], which works on the
//! platform's native JSON representation. [`super::Api`] adds typing on top.

use async_trait::async_trait;
use fabric_api::labels::LabelSelector;
use fabric_api::ObjectKey;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// One change delivered on the watch stream.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub event_type: WatchEventType,
    pub kind: String,
    /// Previous state, for `Modified` events
    pub old: Option<Value>,
    /// Current state (last state for `Deleted`)
    pub object: Value,
}

impl WatchEvent {
    pub fn key(&self) -> ObjectKey {
        object_key(&self.kind, &self.object)
    }
}

/// Which part of an object a write addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subresource {
    /// Everything except `status`
    Main,
    Status,
}

/// Declarative object store with compare-and-swap updates.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<Value, StoreError>;

    /// Objects of `kind`, in `namespace` when given, matching `selector`.
    async fn list(
        &self,
        kind: &str,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<Value>, StoreError>;

    async fn create(&self, kind: &str, object: Value) -> Result<Value, StoreError>;

    /// Replace everything but `status`. Fails with `Conflict` when the
    /// object's `resourceVersion` is set and stale.
    async fn update(&self, kind: &str, object: Value) -> Result<Value, StoreError>;

    /// Replace `status` only, with the same concurrency check as `update`.
    async fn update_status(&self, kind: &str, object: Value) -> Result<Value, StoreError>;

    /// Apply a JSON merge patch to the main resource or the status.
    async fn patch(
        &self,
        key: &ObjectKey,
        subresource: Subresource,
        patch: Value,
    ) -> Result<Value, StoreError>;

    /// Delete an object; dependents owned by it are collected.
    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError>;

    async fn delete_collection(
        &self,
        kind: &str,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<usize, StoreError>;

    /// Subscribe to changes on every kind.
    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}

/// Key of a JSON object of `kind` from its metadata.
pub fn object_key(kind: &str, object: &Value) -> ObjectKey {
    let meta = &object["metadata"];
    ObjectKey::new(
        kind,
        meta["namespace"].as_str().filter(|ns| !ns.is_empty()),
        meta["name"].as_str().unwrap_or_default(),
    )
}
