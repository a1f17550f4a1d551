//! Typed access to the object store.

use fabric_api::labels::LabelSelector;
use fabric_api::{ObjectKey, Resource};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

use super::traits::{ObjectStore, Subresource};
use crate::error::StoreError;

/// Handle over one kind, optionally bound to a namespace.
pub struct Api<K> {
    store: Arc<dyn ObjectStore>,
    namespace: Option<String>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for Api<K> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            namespace: self.namespace.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: Resource> Api<K> {
    /// Cluster-scoped kinds, or namespaced kinds across all namespaces.
    pub fn all(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            namespace: None,
            _kind: PhantomData,
        }
    }

    pub fn namespaced(store: Arc<dyn ObjectStore>, namespace: &str) -> Self {
        Self {
            store,
            namespace: Some(namespace.to_string()),
            _kind: PhantomData,
        }
    }

    fn key(&self, name: &str) -> ObjectKey {
        ObjectKey::new(K::KIND, self.namespace.as_deref(), name)
    }

    fn decode(value: Value) -> Result<K, StoreError> {
        Ok(serde_json::from_value(value)?)
    }

    fn encode(&self, obj: &K) -> Result<Value, StoreError> {
        let mut value = serde_json::to_value(obj)?;
        if K::NAMESPACED && obj.namespace().is_none() {
            if let Some(ns) = &self.namespace {
                value["metadata"]["namespace"] = Value::from(ns.as_str());
            }
        }
        Ok(value)
    }

    pub async fn get(&self, name: &str) -> Result<K, StoreError> {
        Self::decode(self.store.get(&self.key(name)).await?)
    }

    /// `None` when the object does not exist.
    pub async fn get_opt(&self, name: &str) -> Result<Option<K>, StoreError> {
        match self.get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn list(&self, selector: &LabelSelector) -> Result<Vec<K>, StoreError> {
        self.store
            .list(K::KIND, self.namespace.as_deref(), selector)
            .await?
            .into_iter()
            .map(Self::decode)
            .collect()
    }

    pub async fn create(&self, obj: &K) -> Result<K, StoreError> {
        Self::decode(self.store.create(K::KIND, self.encode(obj)?).await?)
    }

    pub async fn update(&self, obj: &K) -> Result<K, StoreError> {
        Self::decode(self.store.update(K::KIND, self.encode(obj)?).await?)
    }

    pub async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        Self::decode(self.store.update_status(K::KIND, self.encode(obj)?).await?)
    }

    pub async fn patch(&self, name: &str, subresource: Subresource, patch: Value) -> Result<K, StoreError> {
        Self::decode(self.store.patch(&self.key(name), subresource, patch).await?)
    }

    /// Read-modify-write `name` with compare-and-swap. `edit` returns whether
    /// it changed anything; unchanged objects are not written.
    pub async fn modify<F>(&self, name: &str, retries: u32, edit: F) -> Result<K, StoreError>
    where
        F: FnMut(&mut K) -> bool,
    {
        self.read_modify_write(name, retries, edit, false).await
    }

    /// Like [`Api::modify`] against the status subresource.
    pub async fn modify_status<F>(&self, name: &str, retries: u32, edit: F) -> Result<K, StoreError>
    where
        F: FnMut(&mut K) -> bool,
    {
        self.read_modify_write(name, retries, edit, true).await
    }

    async fn read_modify_write<F>(&self, name: &str, retries: u32, mut edit: F, status: bool) -> Result<K, StoreError>
    where
        F: FnMut(&mut K) -> bool,
    {
        for _ in 0..retries.max(1) {
            let mut obj = self.get(name).await?;
            if !edit(&mut obj) {
                return Ok(obj);
            }
            let written = if status {
                self.update_status(&obj).await
            } else {
                self.update(&obj).await
            };
            match written {
                Err(e) if e.is_conflict() => continue,
                other => return other,
            }
        }
        Err(StoreError::Conflict(format!("{}: retries exhausted", self.key(name))))
    }

    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.store.delete(&self.key(name)).await
    }

    pub async fn delete_collection(&self, selector: &LabelSelector) -> Result<usize, StoreError> {
        self.store
            .delete_collection(K::KIND, self.namespace.as_deref(), selector)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use fabric_api::federation::{FederationSpec, Policy};
    use fabric_api::platform::ConfigMap;
    use fabric_api::{Federation, Member, ObjectMeta};

    #[tokio::test]
    async fn test_typed_roundtrip() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let feds: Api<Federation> = Api::all(store);
        let fed = Federation::new(
            "fed1",
            FederationSpec {
                members: vec![Member::initiator("org1")],
                policy: Some(Policy::All),
                description: String::new(),
            },
        );
        let created = feds.create(&fed).await.unwrap();
        assert!(created.metadata.uid.is_some());
        assert_eq!(feds.get("fed1").await.unwrap().spec.policy, Some(Policy::All));
        assert!(feds.get_opt("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_namespaced_api_fills_namespace() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let cms: Api<ConfigMap> = Api::namespaced(Arc::clone(&store), "ops");
        let cm = ConfigMap {
            metadata: ObjectMeta::named("fed-fed1-spec"),
            ..Default::default()
        };
        cms.create(&cm).await.unwrap();
        let stored = cms.get("fed-fed1-spec").await.unwrap();
        assert_eq!(stored.metadata.namespace.as_deref(), Some("ops"));

        let elsewhere: Api<ConfigMap> = Api::namespaced(store, "other");
        assert!(elsewhere.get("fed-fed1-spec").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_modify_skips_unchanged_and_writes_changes() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        let feds: Api<Federation> = Api::all(store);
        let created = feds
            .create(&Federation::new("fed1", FederationSpec::default()))
            .await
            .unwrap();

        let same = feds.modify("fed1", 3, |_| false).await.unwrap();
        assert_eq!(same.metadata.resource_version, created.metadata.resource_version);

        let changed = feds
            .modify("fed1", 3, |f| {
                f.spec.members.push(Member::new("org2"));
                true
            })
            .await
            .unwrap();
        assert_eq!(changed.spec.members.len(), 1);
        assert_ne!(changed.metadata.resource_version, created.metadata.resource_version);
    }
}
