//! Shared collaborators handed to every reconciler.

use fabric_api::Resource;
use std::sync::Arc;

use super::mirror::SpecMirror;
use crate::config::OperatorConfig;
use crate::rbac::RbacSync;
use crate::sdk::FabricSdk;
use crate::store::{Api, ObjectStore};

#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn ObjectStore>,
    pub sdk: Arc<dyn FabricSdk>,
    pub config: Arc<OperatorConfig>,
}

impl Context {
    pub fn new(store: Arc<dyn ObjectStore>, sdk: Arc<dyn FabricSdk>, config: OperatorConfig) -> Self {
        Self {
            store,
            sdk,
            config: Arc::new(config),
        }
    }

    /// Cluster-wide handle for `K`.
    pub fn api<K: Resource>(&self) -> Api<K> {
        Api::all(Arc::clone(&self.store))
    }

    pub fn namespaced<K: Resource>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(Arc::clone(&self.store), namespace)
    }

    pub fn rbac(&self) -> RbacSync {
        RbacSync::new(Arc::clone(&self.store), self.config.status_patch_retries)
    }

    pub fn mirror(&self) -> SpecMirror {
        SpecMirror::new(Arc::clone(&self.store), &self.config.operator_namespace)
    }
}
