//! Spec mirrors: the last reconciled spec of an object, kept in the operator
//! namespace as `<prefix>-<name>-spec` so restarts can rebuild update masks.

use fabric_api::platform::ConfigMap;
use fabric_api::ObjectMeta;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::store::{Api, ObjectStore};

pub const SPEC_KEY: &str = "spec";

pub fn mirror_name(prefix: &str, name: &str) -> String {
    format!("{}-{}-spec", prefix, name)
}

#[derive(Clone)]
pub struct SpecMirror {
    api: Api<ConfigMap>,
    namespace: String,
}

impl SpecMirror {
    pub fn new(store: Arc<dyn ObjectStore>, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(store, namespace),
            namespace: namespace.to_string(),
        }
    }

    /// The mirrored spec, if any. An undecodable mirror counts as absent.
    pub async fn load<S: DeserializeOwned>(&self, prefix: &str, name: &str) -> Result<Option<S>> {
        let Some(cm) = self.api.get_opt(&mirror_name(prefix, name)).await? else {
            return Ok(None);
        };
        Ok(cm
            .binary_data
            .get(SPEC_KEY)
            .and_then(|raw| serde_json::from_slice(raw).ok()))
    }

    /// Store `spec`, last writer wins.
    pub async fn save<S: Serialize>(&self, prefix: &str, name: &str, spec: &S) -> Result<()> {
        let raw = serde_json::to_vec(spec)?;
        let cm_name = mirror_name(prefix, name);
        match self.api.get_opt(&cm_name).await? {
            Some(mut cm) => {
                if cm.binary_data.get(SPEC_KEY) == Some(&raw) {
                    return Ok(());
                }
                cm.binary_data.insert(SPEC_KEY.to_string(), raw);
                cm.metadata.resource_version = None;
                self.api.update(&cm).await?;
            }
            None => {
                let mut cm = ConfigMap {
                    metadata: ObjectMeta::namespaced(&self.namespace, &cm_name),
                    ..Default::default()
                };
                cm.binary_data.insert(SPEC_KEY.to_string(), raw);
                match self.api.create(&cm).await {
                    Ok(_) => {}
                    // Raced with another writer; theirs is as good as ours.
                    Err(e) if e.is_already_exists() => debug!(mirror = %cm_name, "mirror created concurrently"),
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    pub async fn delete(&self, prefix: &str, name: &str) -> Result<()> {
        match self.api.delete(&mirror_name(prefix, name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
