//! In-memory object store.
//!
//! Behaves like the platform store as far as the operator can tell: resource
//! versions with compare-and-swap, a separate status subresource, JSON merge
//! patch, owner-reference garbage collection and a broadcast watch stream.

use async_trait::async_trait;
use chrono::Utc;
use fabric_api::labels::LabelSelector;
use fabric_api::ObjectKey;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::traits::{object_key, ObjectStore, Subresource, WatchEvent, WatchEventType};
use crate::error::StoreError;

/// Capacity of the watch broadcast channel
const WATCH_CAPACITY: usize = 4096;

pub struct MemoryStore {
    objects: RwLock<BTreeMap<ObjectKey, Value>>,
    version: AtomicU64,
    events: broadcast::Sender<WatchEvent>,
    /// Kinds whose writes are refused as invalid
    rejected_kinds: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            version: AtomicU64::new(1),
            events,
            rejected_kinds: Mutex::new(HashSet::new()),
        }
    }

    /// Refuse creates and updates of `kind` with `StoreError::Invalid`.
    pub fn reject_writes(&self, kind: &str) {
        if let Ok(mut kinds) = self.rejected_kinds.lock() {
            kinds.insert(kind.to_string());
        }
    }

    pub fn accept_writes(&self, kind: &str) {
        if let Ok(mut kinds) = self.rejected_kinds.lock() {
            kinds.remove(kind);
        }
    }

    /// Number of stored objects of `kind`.
    pub async fn count(&self, kind: &str) -> usize {
        self.objects.read().await.keys().filter(|k| k.kind == kind).count()
    }

    fn check_writable(&self, kind: &str) -> Result<(), StoreError> {
        let rejected = self
            .rejected_kinds
            .lock()
            .map(|kinds| kinds.contains(kind))
            .unwrap_or(false);
        if rejected {
            return Err(StoreError::Invalid(format!("writes to {} are refused", kind)));
        }
        Ok(())
    }

    fn next_version(&self) -> String {
        self.version.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn emit(&self, event_type: WatchEventType, kind: &str, old: Option<Value>, object: Value) {
        // No subscribers is fine.
        let _ = self.events.send(WatchEvent {
            event_type,
            kind: kind.to_string(),
            old,
            object,
        });
    }

    fn check_version(key: &ObjectKey, stored: &Value, incoming: &Value) -> Result<(), StoreError> {
        match incoming["metadata"]["resourceVersion"].as_str() {
            Some(rv) if !rv.is_empty() && Some(rv) != stored["metadata"]["resourceVersion"].as_str() => {
                Err(StoreError::Conflict(format!(
                    "{} was modified (have {}, stored {})",
                    key,
                    rv,
                    stored["metadata"]["resourceVersion"].as_str().unwrap_or_default()
                )))
            }
            _ => Ok(()),
        }
    }

    fn commit_modified(
        &self,
        objects: &mut BTreeMap<ObjectKey, Value>,
        key: ObjectKey,
        old: Value,
        mut new: Value,
    ) -> Value {
        if old["spec"] != new["spec"] {
            let generation = old["metadata"]["generation"].as_i64().unwrap_or(1) + 1;
            new["metadata"]["generation"] = Value::from(generation);
        }
        new["metadata"]["resourceVersion"] = Value::from(self.next_version());
        objects.insert(key.clone(), new.clone());
        self.emit(WatchEventType::Modified, &key.kind, Some(old), new.clone());
        new
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// RFC 7386 JSON merge patch.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(fields) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_fields) = target {
        for (k, v) in fields {
            if v.is_null() {
                target_fields.remove(k);
            } else {
                merge_patch(target_fields.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
    }
}

fn set_status(object: &mut Value, status: Option<&Value>) {
    if let Value::Object(fields) = object {
        match status {
            Some(s) if !s.is_null() => {
                fields.insert("status".to_string(), s.clone());
            }
            _ => {
                fields.remove("status");
            }
        }
    }
}

fn labels_of(object: &Value) -> BTreeMap<String, String> {
    object["metadata"]["labels"]
        .as_object()
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn owned_by(object: &Value, uid: &str) -> bool {
    object["metadata"]["ownerReferences"]
        .as_array()
        .map(|refs| refs.iter().any(|r| r["uid"].as_str() == Some(uid)))
        .unwrap_or(false)
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Value, StoreError> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn list(
        &self,
        kind: &str,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<Value>, StoreError> {
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|(k, _)| k.kind == kind)
            .filter(|(k, _)| namespace.is_none() || k.namespace.as_deref() == namespace)
            .filter(|(_, v)| selector.matches(&labels_of(v)))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn create(&self, kind: &str, mut object: Value) -> Result<Value, StoreError> {
        self.check_writable(kind)?;
        if !object.is_object() {
            return Err(StoreError::Invalid(format!("{} is not an object", kind)));
        }
        let key = object_key(kind, &object);
        if key.name.is_empty() {
            return Err(StoreError::Invalid(format!("{} without a name", kind)));
        }

        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }

        if object["kind"].as_str().map(str::is_empty).unwrap_or(true) {
            object["kind"] = Value::from(kind);
        }
        let meta = &mut object["metadata"];
        if meta["uid"].as_str().map(str::is_empty).unwrap_or(true) {
            meta["uid"] = Value::from(uuid::Uuid::new_v4().to_string());
        }
        meta["resourceVersion"] = Value::from(self.next_version());
        meta["generation"] = Value::from(1);
        meta["creationTimestamp"] = serde_json::to_value(Utc::now())?;

        objects.insert(key.clone(), object.clone());
        debug!(key = %key, "object created");
        self.emit(WatchEventType::Added, kind, None, object.clone());
        Ok(object)
    }

    async fn update(&self, kind: &str, object: Value) -> Result<Value, StoreError> {
        self.check_writable(kind)?;
        if !object.is_object() {
            return Err(StoreError::Invalid(format!("{} is not an object", kind)));
        }
        let key = object_key(kind, &object);
        let mut objects = self.objects.write().await;
        let stored = objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Self::check_version(&key, &stored, &object)?;

        let mut new = object;
        set_status(&mut new, stored.get("status"));
        for field in ["uid", "creationTimestamp", "generation"] {
            new["metadata"][field] = stored["metadata"][field].clone();
        }
        Ok(self.commit_modified(&mut objects, key, stored, new))
    }

    async fn update_status(&self, kind: &str, object: Value) -> Result<Value, StoreError> {
        let key = object_key(kind, &object);
        let mut objects = self.objects.write().await;
        let stored = objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Self::check_version(&key, &stored, &object)?;

        let mut new = stored.clone();
        set_status(&mut new, object.get("status"));
        Ok(self.commit_modified(&mut objects, key, stored, new))
    }

    async fn patch(
        &self,
        key: &ObjectKey,
        subresource: Subresource,
        patch: Value,
    ) -> Result<Value, StoreError> {
        if subresource == Subresource::Main {
            self.check_writable(&key.kind)?;
        }
        let mut objects = self.objects.write().await;
        let stored = objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Self::check_version(key, &stored, &patch)?;

        let mut new = stored.clone();
        match subresource {
            Subresource::Main => {
                merge_patch(&mut new, &patch);
                set_status(&mut new, stored.get("status"));
            }
            Subresource::Status => {
                let mut status = stored.get("status").cloned().unwrap_or(Value::Null);
                merge_patch(&mut status, &patch["status"]);
                set_status(&mut new, Some(&status));
            }
        }
        new["metadata"]["name"] = stored["metadata"]["name"].clone();
        new["metadata"]["uid"] = stored["metadata"]["uid"].clone();
        Ok(self.commit_modified(&mut objects, key.clone(), stored, new))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let mut objects = self.objects.write().await;
        let root = objects
            .remove(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        let mut removed = vec![(key.clone(), root)];
        let mut cursor = 0;
        while cursor < removed.len() {
            let uid = removed[cursor].1["metadata"]["uid"].as_str().unwrap_or_default().to_string();
            cursor += 1;
            if uid.is_empty() {
                continue;
            }
            let dependents: Vec<ObjectKey> = objects
                .iter()
                .filter(|(_, v)| owned_by(v, &uid))
                .map(|(k, _)| k.clone())
                .collect();
            for dep in dependents {
                if let Some(v) = objects.remove(&dep) {
                    debug!(owner = %key, dependent = %dep, "garbage collected");
                    removed.push((dep, v));
                }
            }
        }

        for (k, v) in removed {
            self.emit(WatchEventType::Deleted, &k.kind, None, v);
        }
        Ok(())
    }

    async fn delete_collection(
        &self,
        kind: &str,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<usize, StoreError> {
        let victims = self.list(kind, namespace, selector).await?;
        let mut deleted = 0;
        for v in victims {
            match self.delete(&object_key(kind, &v)).await {
                Ok(()) => deleted += 1,
                // Already collected as a dependent of an earlier victim.
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(deleted)
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cm(name: &str) -> Value {
        json!({"metadata": {"name": name, "namespace": "ns"}, "data": {"a": "1"}})
    }

    #[tokio::test]
    async fn test_create_assigns_metadata() {
        let store = MemoryStore::new();
        let created = store.create("ConfigMap", cm("one")).await.unwrap();
        assert!(created["metadata"]["uid"].is_string());
        assert!(created["metadata"]["resourceVersion"].is_string());
        assert_eq!(created["kind"], "ConfigMap");
        assert!(matches!(
            store.create("ConfigMap", cm("one")).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_update_rejects_stale_version() {
        let store = MemoryStore::new();
        let created = store.create("ConfigMap", cm("one")).await.unwrap();
        let mut first = created.clone();
        first["data"]["a"] = json!("2");
        store.update("ConfigMap", first).await.unwrap();

        let mut stale = created;
        stale["data"]["a"] = json!("3");
        assert!(store.update("ConfigMap", stale).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_update_keeps_status_and_status_update_keeps_spec() {
        let store = MemoryStore::new();
        let obj = json!({"metadata": {"name": "f"}, "spec": {"x": 1}});
        store.create("Federation", obj).await.unwrap();

        let key = ObjectKey::new("Federation", None, "f");
        let mut with_status = store.get(&key).await.unwrap();
        with_status["status"] = json!({"type": "Pending"});
        with_status["spec"] = json!({"x": 99});
        store.update_status("Federation", with_status).await.unwrap();

        let stored = store.get(&key).await.unwrap();
        assert_eq!(stored["spec"]["x"], 1);
        assert_eq!(stored["status"]["type"], "Pending");

        let mut spec_change = stored.clone();
        spec_change["spec"]["x"] = json!(2);
        spec_change.as_object_mut().unwrap().remove("status");
        let updated = store.update("Federation", spec_change).await.unwrap();
        assert_eq!(updated["status"]["type"], "Pending");
        assert_eq!(updated["metadata"]["generation"], 2);
    }

    #[tokio::test]
    async fn test_merge_patch_removes_nulls() {
        let mut target = json!({"a": 1, "b": {"c": 2, "d": 3}});
        merge_patch(&mut target, &json!({"a": null, "b": {"c": 5}}));
        assert_eq!(target, json!({"b": {"c": 5, "d": 3}}));
    }

    #[tokio::test]
    async fn test_delete_collects_dependents() {
        let store = MemoryStore::new();
        let owner = store
            .create("Network", json!({"metadata": {"name": "net"}, "spec": {}}))
            .await
            .unwrap();
        let uid = owner["metadata"]["uid"].as_str().unwrap().to_string();
        store
            .create(
                "Channel",
                json!({"metadata": {"name": "ch", "ownerReferences": [{"apiVersion": "v", "kind": "Network", "name": "net", "uid": uid}]}, "spec": {}}),
            )
            .await
            .unwrap();

        let mut events = store.watch();
        store.delete(&ObjectKey::new("Network", None, "net")).await.unwrap();
        assert_eq!(store.count("Channel").await, 0);

        let first = events.recv().await.unwrap();
        assert_eq!(first.event_type, WatchEventType::Deleted);
        assert_eq!(first.kind, "Network");
        assert_eq!(events.recv().await.unwrap().kind, "Channel");
    }

    #[tokio::test]
    async fn test_list_filters_by_namespace_and_labels() {
        let store = MemoryStore::new();
        let mut labelled = cm("one");
        labelled["metadata"]["labels"] = json!({"app": "x"});
        store.create("ConfigMap", labelled).await.unwrap();
        store.create("ConfigMap", cm("two")).await.unwrap();

        let all = store.list("ConfigMap", Some("ns"), &LabelSelector::everything()).await.unwrap();
        assert_eq!(all.len(), 2);
        let selected = store
            .list("ConfigMap", None, &LabelSelector::eq("app", "x"))
            .await
            .unwrap();
        assert_eq!(selected.len(), 1);
        assert!(store.list("ConfigMap", Some("other"), &LabelSelector::everything()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_kind_is_invalid() {
        let store = MemoryStore::new();
        store.reject_writes("ClusterRole");
        let err = store
            .create("ClusterRole", json!({"metadata": {"name": "r"}}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }
}
