//! Shared harness for the end-to-end tests.
//!
//! Runs every controller against an in-memory store and the mock SDK, and
//! seeds the objects the peer and orderer operators would publish.

#![allow(dead_code)]

use fabric_api::channel::ChannelSpec;
use fabric_api::chaincode::{pod_name, ChaincodeImage, ChaincodeSpec};
use fabric_api::endorse_policy::EndorsePolicySpec;
use fabric_api::federation::FederationSpec;
use fabric_api::meta::{NamedRef, NamespacedName};
use fabric_api::network::NetworkSpec;
use fabric_api::organization::OrganizationSpec;
use fabric_api::platform::{ConfigMap, Deployment, DeploymentStatus, Orderer, OrdererSpec, Pod, PodStatus};
use fabric_api::proposal::ProposalSpec;
use fabric_api::vote::vote_name;
use fabric_api::{
    Chaincode, Channel, EndorsePolicy, Federation, Member, Network, ObjectMeta, Organization, Policy, Proposal,
    Resource, Vote,
};
use fabric_operator::chaincode::package;
use fabric_operator::controller::{Context, Manager, ManagerHandle};
use fabric_operator::reconcilers;
use fabric_operator::sdk::{FabricSdk, MockSdk, NodeProfile};
use fabric_operator::store::{Api, MemoryStore, ObjectStore};
use fabric_operator::OperatorConfig;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

const WAIT: Duration = Duration::from_secs(10);
const POLL: Duration = Duration::from_millis(10);

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub sdk: Arc<MockSdk>,
    pub ctx: Context,
    handle: Option<ManagerHandle>,
    _dir: TempDir,
}

impl Harness {
    /// A running operator with short poll and retry intervals.
    pub async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let sdk = Arc::new(MockSdk::new());
        let config = OperatorConfig {
            store: dir.path().to_path_buf(),
            peer_poll_interval: Duration::from_millis(10),
            peer_poll_timeout: Duration::from_millis(200),
            lifecycle_retry_interval: Duration::from_millis(20),
            status_patch_retries: 10,
            install_retries: 1,
            ..OperatorConfig::default()
        };
        let ctx = Context::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            Arc::clone(&sdk) as Arc<dyn FabricSdk>,
            config,
        );
        let manager = reconcilers::controllers(&ctx)
            .into_iter()
            .fold(Manager::new(ctx.clone()), Manager::register);
        let handle = manager.start().await;
        Self {
            store,
            sdk,
            ctx,
            handle: Some(handle),
            _dir: dir,
        }
    }

    pub async fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown().await;
        }
    }

    fn api<K: Resource>(&self, namespace: Option<&str>) -> Api<K> {
        match namespace {
            Some(ns) => Api::namespaced(Arc::clone(&self.ctx.store), ns),
            None => Api::all(Arc::clone(&self.ctx.store)),
        }
    }

    pub async fn get<K: Resource>(&self, namespace: Option<&str>, name: &str) -> K {
        self.api::<K>(namespace).get(name).await.unwrap()
    }

    /// Poll `namespace/name` until `ready` holds, then return the object.
    pub async fn wait_for<K, F>(&self, namespace: Option<&str>, name: &str, what: &str, ready: F) -> K
    where
        K: Resource,
        F: Fn(&K) -> bool,
    {
        let api = self.api::<K>(namespace);
        let deadline = Instant::now() + WAIT;
        loop {
            if let Some(obj) = api.get_opt(name).await.unwrap() {
                if ready(&obj) {
                    return obj;
                }
            }
            assert!(Instant::now() < deadline, "timed out waiting for {} {}: {}", K::KIND, name, what);
            tokio::time::sleep(POLL).await;
        }
    }

    pub async fn organization(&self, name: &str, admin: &str) -> Organization {
        let org = Organization::new(
            name,
            OrganizationSpec {
                admin: admin.to_string(),
                ..Default::default()
            },
        );
        self.api::<Organization>(None).create(&org).await.unwrap()
    }

    pub async fn federation(&self, name: &str, members: &[&str], policy: Policy) -> Federation {
        let fed = Federation::new(
            name,
            FederationSpec {
                members: members_of(members),
                policy: Some(policy),
                description: String::new(),
            },
        );
        self.api::<Federation>(None).create(&fed).await.unwrap()
    }

    /// A network plus the profile its orderer's first node publishes.
    pub async fn network(&self, name: &str, federation: &str, members: &[&str]) -> Network {
        let ns = members[0];
        let orderer = Orderer {
            metadata: ObjectMeta::namespaced(ns, name),
            spec: OrdererSpec::default(),
            status: None,
        };
        let node = orderer.node_names()[0].clone();
        let profile = NodeProfile::new(format!("grpcs://{}.{}:7050", node, ns), "ORDERER-TLS")
            .config_map(ns, &node)
            .unwrap();
        self.api::<ConfigMap>(Some(ns)).create(&profile).await.unwrap();

        let net = Network::new(
            name,
            NetworkSpec {
                federation: federation.to_string(),
                members: members_of(members),
                ..Default::default()
            },
        );
        self.api::<Network>(None).create(&net).await.unwrap()
    }

    /// An available peer workload and its connection profile.
    pub async fn peer(&self, org: &str, peer: &str) {
        let mut deployment = Deployment {
            metadata: ObjectMeta::namespaced(org, peer),
            ..Default::default()
        };
        deployment.spec.replicas = Some(1);
        deployment.status = Some(DeploymentStatus {
            replicas: 1,
            available_replicas: 1,
        });
        self.api::<Deployment>(Some(org)).create(&deployment).await.unwrap();
        let profile = NodeProfile::new(format!("grpcs://{}.{}:7051", peer, org), "PEER-TLS")
            .config_map(org, peer)
            .unwrap();
        self.api::<ConfigMap>(Some(org)).create(&profile).await.unwrap();
    }

    pub async fn channel(&self, name: &str, network: &str, members: &[&str], peers: &[(&str, &str)]) -> Channel {
        let ch = Channel::new(
            name,
            ChannelSpec {
                network: network.to_string(),
                members: members_of(members),
                peers: peers.iter().map(|(ns, p)| NamespacedName::new(*ns, *p)).collect(),
                description: String::new(),
            },
        );
        self.api::<Channel>(None).create(&ch).await.unwrap()
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
        self.api::<EndorsePolicy>(None).create(&ep).await.unwrap()
    }

    pub async fn chaincode(&self, name: &str, channel: &str, policy: &str) -> Chaincode {
        let cc = Chaincode::new(
            name,
            ChaincodeSpec {
                channel: channel.to_string(),
                id: "basic".into(),
                version: "1.0".into(),
                label: "basic".into(),
                init_required: false,
                endorse_policy_ref: NamedRef { name: policy.into() },
                external_builder: None,
                images: image(),
                description: String::new(),
            },
        );
        self.api::<Chaincode>(None).create(&cc).await.unwrap()
    }

    /// The running chaincode pod for each peer, as the peer would start it.
    pub async fn chaincode_pods(&self, cc: &Chaincode, peers: &[(&str, &str)]) {
        let bytes = package::build(&cc.spec.label, &cc.spec.images).unwrap();
        let id = package::package_id(&cc.spec.label, &bytes);
        for (org, peer) in peers {
            let pod = Pod {
                metadata: ObjectMeta::namespaced(*org, pod_name(org, peer, &id)),
                status: Some(PodStatus {
                    phase: "Running".into(),
                }),
            };
            self.api::<Pod>(Some(*org)).create(&pod).await.unwrap();
        }
    }

    pub async fn propose(&self, name: &str, spec: ProposalSpec) -> Proposal {
        let mut p = Proposal::new(name, spec);
        p.apply_defaults(chrono::Utc::now());
        self.api::<Proposal>(None).create(&p).await.unwrap()
    }

    /// Wait for `org`'s vote on `proposal` and cast `decision`.
    pub async fn vote(&self, org: &str, proposal: &str, decision: bool) {
        let name = vote_name(org, proposal);
        self.wait_for::<Vote, _>(Some(org), &name, "deployed", |_| true).await;
        self.api::<Vote>(Some(org))
            .modify(&name, 10, |vote| {
                vote.spec.decision = Some(decision);
                true
            })
            .await
            .unwrap();
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

pub fn image() -> ChaincodeImage {
    ChaincodeImage {
        name: "hyperledgerk8s/go-contract".into(),
        digest: "sha256:0f3a".into(),
        pull_secret: String::new(),
    }
}
