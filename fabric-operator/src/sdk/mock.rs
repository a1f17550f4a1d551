//! Mock SDK for testing.
//!
//! Keeps a small in-process ledger of channels, joins, installs, approvals and
//! commits. Nodes can be taken down to make every call against them fail.

use async_trait::async_trait;
use fabric_api::organization::CaRef;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::traits::*;
use crate::chaincode::package::package_id;
use crate::error::SdkError;

#[derive(Debug, Default)]
struct Ledger {
    channels: BTreeSet<String>,
    /// (channel, node)
    joined: BTreeSet<(String, String)>,
    /// node → package ids
    installed: BTreeMap<String, BTreeSet<String>>,
    /// (channel, chaincode, msp) → approval
    approved: BTreeMap<(String, String, String), DefinitionState>,
    /// (channel, chaincode) → committed definition
    committed: BTreeMap<(String, String), DefinitionState>,
}

/// Scriptable in-memory SDK.
pub struct MockSdk {
    ledger: Mutex<Ledger>,
    down: Mutex<BTreeSet<String>>,
    enroll_fails: AtomicBool,
    calls: Mutex<HashMap<&'static str, u32>>,
}

impl MockSdk {
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            down: Mutex::new(BTreeSet::new()),
            enroll_fails: AtomicBool::new(false),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Make enrollment fail with `SdkError::Failed`.
    pub fn with_enroll_failure(self, fails: bool) -> Self {
        self.enroll_fails.store(fails, Ordering::SeqCst);
        self
    }

    /// Take a node down (`<namespace>/<name>`).
    pub fn set_down(&self, node: &str, down: bool) {
        if let Ok(mut nodes) = self.down.lock() {
            if down {
                nodes.insert(node.to_string());
            } else {
                nodes.remove(node);
            }
        }
    }

    /// Number of times `operation` was invoked.
    pub fn call_count(&self, operation: &str) -> u32 {
        self.calls
            .lock()
            .map(|c| c.get(operation).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn is_joined(&self, channel: &str, node: &str) -> bool {
        self.with_ledger(|l| l.joined.contains(&(channel.to_string(), node.to_string())))
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.with_ledger(|l| l.channels.contains(channel))
    }

    pub fn installed_on(&self, node: &str) -> Vec<String> {
        self.with_ledger(|l| {
            l.installed
                .get(node)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    pub fn committed(&self, channel: &str, name: &str) -> Option<DefinitionState> {
        self.with_ledger(|l| l.committed.get(&(channel.to_string(), name.to_string())).cloned())
    }

    fn with_ledger<T>(&self, f: impl FnOnce(&mut Ledger) -> T) -> T {
        match self.ledger.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn record(&self, operation: &'static str) {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(operation).or_insert(0) += 1;
        }
    }

    fn reachable(&self, endpoint: &Endpoint) -> Result<(), SdkError> {
        let down = self
            .down
            .lock()
            .map(|d| d.contains(&endpoint.node))
            .unwrap_or(false);
        if down {
            return Err(SdkError::Unavailable(format!("{} is unreachable", endpoint.node)));
        }
        Ok(())
    }
}

impl Default for MockSdk {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FabricSdk for MockSdk {
    async fn enroll(&self, ca: &CaRef, msp_id: &str, enroll_id: &str) -> Result<Enrollment, SdkError> {
        self.record("enroll");
        if self.enroll_fails.load(Ordering::SeqCst) {
            return Err(SdkError::Failed(format!("enroll {} against {}: authentication failure", enroll_id, ca.name)));
        }
        Ok(Enrollment {
            identity: Identity {
                msp_id: msp_id.to_string(),
                cert: format!("cert:{}:{}", ca.name, enroll_id).into_bytes(),
                key: format!("key:{}:{}", ca.name, enroll_id).into_bytes(),
            },
            ca_cert: format!("ca:{}:{}", ca.name, ca.ca).into_bytes(),
        })
    }

    async fn create_channel(
        &self,
        channel: &str,
        _members: &[String],
        orderer: &Endpoint,
        _admin: &Identity,
    ) -> Result<(), SdkError> {
        self.record("create_channel");
        self.reachable(orderer)?;
        self.with_ledger(|l| {
            if !l.channels.insert(channel.to_string()) {
                return Err(SdkError::Failed(format!("channel {} already exists", channel)));
            }
            Ok(())
        })
    }

    async fn join_channel(
        &self,
        channel: &str,
        peer: &Endpoint,
        _orderer: &Endpoint,
        _admin: &Identity,
    ) -> Result<(), SdkError> {
        self.record("join_channel");
        self.reachable(peer)?;
        self.with_ledger(|l| {
            if !l.joined.insert((channel.to_string(), peer.node.clone())) {
                return Err(SdkError::Failed(format!(
                    "cannot create ledger from genesis block: ledger [{}] already exists",
                    channel
                )));
            }
            Ok(())
        })
    }

    async fn lifecycle_query_installed(
        &self,
        peer: &Endpoint,
        _admin: &Identity,
        package_id: &str,
    ) -> Result<(), SdkError> {
        self.record("query_installed");
        self.reachable(peer)?;
        self.with_ledger(|l| {
            let found = l
                .installed
                .get(&peer.node)
                .map(|s| s.contains(package_id))
                .unwrap_or(false);
            if found {
                Ok(())
            } else {
                Err(SdkError::NotFound(format!("chaincode install package '{}' not found", package_id)))
            }
        })
    }

    async fn lifecycle_install(
        &self,
        peer: &Endpoint,
        _admin: &Identity,
        label: &str,
        package: &[u8],
    ) -> Result<String, SdkError> {
        self.record("install");
        self.reachable(peer)?;
        let id = package_id(label, package);
        self.with_ledger(|l| {
            l.installed.entry(peer.node.clone()).or_default().insert(id.clone());
        });
        Ok(id)
    }

    async fn lifecycle_query_approved(
        &self,
        channel: &str,
        name: &str,
        sequence: i64,
        peer: &Endpoint,
        admin: &Identity,
    ) -> Result<DefinitionState, SdkError> {
        self.record("query_approved");
        self.reachable(peer)?;
        self.with_ledger(|l| {
            l.approved
                .get(&(channel.to_string(), name.to_string(), admin.msp_id.clone()))
                .filter(|d| d.sequence == sequence)
                .cloned()
                .ok_or_else(|| SdkError::NotFound(format!("{} has no approval for {} at sequence {}", admin.msp_id, name, sequence)))
        })
    }

    async fn lifecycle_approve(
        &self,
        channel: &str,
        definition: &ChaincodeDefinition,
        peer: &Endpoint,
        orderer: &Endpoint,
        admin: &Identity,
    ) -> Result<(), SdkError> {
        self.record("approve");
        self.reachable(peer)?;
        self.reachable(orderer)?;
        self.with_ledger(|l| {
            let key = (channel.to_string(), definition.name.clone(), admin.msp_id.clone());
            if l.approved.get(&key).map(|d| d.sequence == definition.sequence).unwrap_or(false) {
                return Err(SdkError::Failed(format!(
                    "attempted to redefine uncommitted sequence ({}) for namespace {}",
                    definition.sequence, definition.name
                )));
            }
            l.approved.insert(
                key,
                DefinitionState {
                    version: definition.version.clone(),
                    sequence: definition.sequence,
                    package_id: definition.package_id.clone(),
                },
            );
            Ok(())
        })
    }

    async fn lifecycle_check_commit_readiness(
        &self,
        channel: &str,
        definition: &ChaincodeDefinition,
        peer: &Endpoint,
        _admin: &Identity,
    ) -> Result<BTreeMap<String, bool>, SdkError> {
        self.record("check_commit_readiness");
        self.reachable(peer)?;
        Ok(self.with_ledger(|l| {
            l.approved
                .iter()
                .filter(|((ch, name, _), _)| ch == channel && *name == definition.name)
                .map(|((_, _, msp), d)| (msp.clone(), d.sequence == definition.sequence))
                .collect()
        }))
    }

    async fn lifecycle_query_committed(
        &self,
        channel: &str,
        name: &str,
        peer: &Endpoint,
        _admin: &Identity,
    ) -> Result<DefinitionState, SdkError> {
        self.record("query_committed");
        self.reachable(peer)?;
        self.with_ledger(|l| {
            l.committed
                .get(&(channel.to_string(), name.to_string()))
                .cloned()
                .ok_or_else(|| SdkError::NotFound(format!("namespace {} is not defined", name)))
        })
    }

    async fn lifecycle_commit(
        &self,
        channel: &str,
        definition: &ChaincodeDefinition,
        peers: &[Endpoint],
        orderer: &Endpoint,
        _admin: &Identity,
    ) -> Result<(), SdkError> {
        self.record("commit");
        self.reachable(orderer)?;
        for peer in peers {
            self.reachable(peer)?;
        }
        self.with_ledger(|l| {
            l.committed.insert(
                (channel.to_string(), definition.name.clone()),
                DefinitionState {
                    version: definition.version.clone(),
                    sequence: definition.sequence,
                    package_id: definition.package_id.clone(),
                },
            );
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> Endpoint {
        Endpoint {
            node: name.to_string(),
            url: format!("grpcs://{}:7051", name),
            tls_ca_pem: String::new(),
        }
    }

    fn admin(msp: &str) -> Identity {
        Identity {
            msp_id: msp.to_string(),
            cert: Vec::new(),
            key: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_second_join_reports_already_exists() {
        let sdk = MockSdk::new();
        let orderer = node("org1/neta");
        sdk.join_channel("ch", &node("org1/peer0"), &orderer, &admin("org1")).await.unwrap();
        let err = sdk
            .join_channel("ch", &node("org1/peer0"), &orderer, &admin("org1"))
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
        assert!(sdk.is_joined("ch", "org1/peer0"));
    }

    #[tokio::test]
    async fn test_down_node_is_unavailable() {
        let sdk = MockSdk::new();
        sdk.set_down("org1/peer1", true);
        let err = sdk
            .lifecycle_query_installed(&node("org1/peer1"), &admin("org1"), "cc:00")
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::Unavailable(_)));
        sdk.set_down("org1/peer1", false);
        let err = sdk
            .lifecycle_query_installed(&node("org1/peer1"), &admin("org1"), "cc:00")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_readiness_reflects_approvals() {
        let sdk = MockSdk::new();
        let def = ChaincodeDefinition {
            name: "cc".into(),
            version: "1.0".into(),
            package_id: "cc:ab".into(),
            sequence: 1,
            endorsement_plugin: ENDORSEMENT_PLUGIN.into(),
            validation_plugin: VALIDATION_PLUGIN.into(),
            init_required: false,
            signature_policy: None,
        };
        let orderer = node("org1/neta");
        sdk.lifecycle_approve("ch", &def, &node("org1/peer0"), &orderer, &admin("org1")).await.unwrap();
        assert!(sdk
            .lifecycle_approve("ch", &def, &node("org1/peer0"), &orderer, &admin("org1"))
            .await
            .is_err());

        let ready = sdk
            .lifecycle_check_commit_readiness("ch", &def, &node("org1/peer0"), &admin("org1"))
            .await
            .unwrap();
        assert_eq!(ready.get("org1"), Some(&true));
        assert_eq!(sdk.call_count("approve"), 2);
    }
}
