//! Seeded stores for unit tests.

use fabric_api::chaincode::{ChaincodeImage, ChaincodeSpec};
use fabric_api::channel::ChannelSpec;
use fabric_api::endorse_policy::EndorsePolicySpec;
use fabric_api::meta::{NamedRef, NamespacedName};
use fabric_api::network::NetworkSpec;
use fabric_api::organization::{msp_secret_name, OrganizationSpec};
use fabric_api::platform::{
    ClusterRole, ConfigMap, Deployment, DeploymentStatus, Namespace, Orderer, OrdererSpec, Secret,
};
use fabric_api::{Chaincode, Channel, EndorsePolicy, Member, Network, ObjectMeta, Organization, Resource};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use crate::config::OperatorConfig;
use crate::controller::Context;
use crate::rbac;
use crate::sdk::{MockSdk, NodeProfile, ADMIN_CERT_KEY, ADMIN_KEY_KEY, CA_CERT_KEY};
use crate::store::{Api, MemoryStore, ObjectStore};

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub sdk: Arc<MockSdk>,
    pub ctx: Context,
    _dir: TempDir,
}

impl Fixture {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let sdk = Arc::new(MockSdk::new());
        let config = OperatorConfig {
            store: dir.path().to_path_buf(),
            peer_poll_interval: Duration::from_millis(5),
            peer_poll_timeout: Duration::from_millis(20),
            lifecycle_retry_interval: Duration::from_millis(10),
            ..OperatorConfig::default()
        };
        let ctx = Context::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            Arc::clone(&sdk) as Arc<dyn crate::sdk::FabricSdk>,
            config,
        );
        Self {
            store,
            sdk,
            ctx,
            _dir: dir,
        }
    }

    pub fn dyn_store(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.store) as Arc<dyn ObjectStore>
    }

    /// An organization as its reconciler leaves it: namespace, MSP secret
    /// and admin cluster-role.
    pub async fn organization(&self, name: &str) -> Organization {
        let org = self
            .ctx
            .api::<Organization>()
            .create(&Organization::new(
                name,
                OrganizationSpec {
                    admin: format!("{}-admin", name),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();
        self.ctx
            .api::<Namespace>()
            .create(&Namespace {
                metadata: ObjectMeta::named(name),
            })
            .await
            .unwrap();
        let mut secret = Secret {
            metadata: ObjectMeta::namespaced(name, msp_secret_name(name)),
            ..Default::default()
        };
        secret.data.insert(ADMIN_CERT_KEY.into(), b"cert".to_vec());
        secret.data.insert(ADMIN_KEY_KEY.into(), b"key".to_vec());
        secret.data.insert(CA_CERT_KEY.into(), b"ca".to_vec());
        self.ctx.api::<Secret>().create(&secret).await.unwrap();
        self.ctx
            .api::<ClusterRole>()
            .create(&rbac::admin_cluster_role(&org))
            .await
            .unwrap();
        org
    }

    /// A peer workload with its connection profile.
    pub async fn peer(&self, org: &str, peer: &str, ready: bool) {
        let mut deployment = Deployment {
            metadata: ObjectMeta::namespaced(org, peer),
            ..Default::default()
        };
        deployment.spec.replicas = Some(1);
        deployment.status = Some(DeploymentStatus {
            replicas: 1,
            available_replicas: i32::from(ready),
        });
        self.ctx.api::<Deployment>().create(&deployment).await.unwrap();
        let profile = NodeProfile::new(format!("grpcs://{}.{}:7051", peer, org), "PEER-TLS")
            .config_map(org, peer)
            .unwrap();
        self.ctx.api::<ConfigMap>().create(&profile).await.unwrap();
    }

    /// A network with its orderer and the orderer node profile, first
    /// member as initiator.
    pub async fn network(&self, name: &str, federation: &str, members: &[&str]) -> Network {
        let spec = NetworkSpec {
            federation: federation.to_string(),
            members: members_of(members),
            ..Default::default()
        };
        let net = self.ctx.api::<Network>().create(&Network::new(name, spec)).await.unwrap();
        let ns = members[0];
        let orderer = Orderer {
            metadata: ObjectMeta::namespaced(ns, name),
            spec: OrdererSpec::default(),
            status: None,
        };
        let node = orderer.node_names()[0].clone();
        self.ctx.api::<Orderer>().create(&orderer).await.unwrap();
        let profile = NodeProfile::new(format!("grpcs://{}.{}:7050", node, ns), "ORDERER-TLS")
            .config_map(ns, &node)
            .unwrap();
        self.ctx.api::<ConfigMap>().create(&profile).await.unwrap();
        net
    }

    pub async fn channel(&self, name: &str, network: &str, members: &[&str], peers: &[(&str, &str)]) -> Channel {
        let spec = ChannelSpec {
            network: network.to_string(),
            members: members_of(members),
            peers: peers.iter().map(|(ns, p)| NamespacedName::new(*ns, *p)).collect(),
            description: String::new(),
        };
        self.ctx.api::<Channel>().create(&Channel::new(name, spec)).await.unwrap()
    }

    pub async fn endorse_policy(&self, name: &str, channel: &str, value: &str) -> EndorsePolicy {
        let ep = EndorsePolicy::new(
            name,
            EndorsePolicySpec {
                channel: channel.to_string(),
                value: value.to_string(),
                description: String::new(),
            },
        );
        self.ctx.api::<EndorsePolicy>().create(&ep).await.unwrap()
    }

    /// An unsaved chaincode `cc` version 1.0 on `channel`.
    pub fn chaincode(&self, name: &str, channel: &str) -> Chaincode {
        Chaincode::new(
            name,
            ChaincodeSpec {
                channel: channel.to_string(),
                id: "cc".into(),
                version: "1.0".into(),
                label: "cc".into(),
                init_required: false,
                endorse_policy_ref: NamedRef { name: "ep".into() },
                external_builder: None,
                images: ChaincodeImage {
                    name: "hyperledgerk8s/go-contract".into(),
                    digest: "sha256:abc".into(),
                    pull_secret: String::new(),
                },
                description: String::new(),
            },
        )
    }

    pub async fn get<K: Resource>(&self, namespace: Option<&str>, name: &str) -> K {
        match namespace {
            Some(ns) => Api::<K>::namespaced(self.dyn_store(), ns).get(name).await.unwrap(),
            None => Api::<K>::all(self.dyn_store()).get(name).await.unwrap(),
        }
    }
}

/// Members with the first one as initiator.
pub fn members_of(names: &[&str]) -> Vec<Member> {
    names
        .iter()
        .enumerate()
        .map(|(i, n)| if i == 0 { Member::initiator(*n) } else { Member::new(*n) })
        .collect()
}

/// A non-privileged admission caller.
pub fn caller(username: &str) -> crate::admission::Caller {
    crate::admission::Caller {
        user: crate::admission::UserInfo::named(username),
        super_user: false,
    }
}

pub fn super_caller() -> crate::admission::Caller {
    crate::admission::Caller {
        user: crate::admission::UserInfo::named("system:admin"),
        super_user: true,
    }
}
