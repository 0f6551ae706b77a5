//! In-memory stand-ins for the cluster, the record store and the node APIs.

#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use k8s_openapi::{
    api::core::v1::{Pod, Secret},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
    ByteString,
};
use kube::Resource;
use provisioner::{
    cluster::{specs, Cluster, ClusterError, ClusterResource},
    config::ClusterLayout,
    connector::{ConnectError, NodeConnector},
    funding::FundingPolicy,
    naming::NodeNames,
    node_api::{Allowance, ConsensusInfo, NodeApiError, NodeClient, WalletInfo},
    reconcile::Reconciler,
    record_store::{RecordStore, RecordStoreError},
};
use shared_types::{Currency, GatewayCredentials, NodeStatus, StorageNode, WalletSeed};
use uuid::Uuid;

// ─── Cluster ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Op {
    pub verb: &'static str,
    pub kind: String,
    pub name: String,
}

pub struct FakeCluster {
    objects: Mutex<BTreeMap<(String, String), serde_json::Value>>,
    pods: Mutex<Vec<Pod>>,
    ops: Mutex<Vec<Op>>,
    next_ip: AtomicU32,
    pub assign_cluster_ips: AtomicBool,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            pods: Mutex::new(Vec::new()),
            ops: Mutex::new(Vec::new()),
            next_ip: AtomicU32::new(1),
            assign_cluster_ips: AtomicBool::new(true),
        }
    }
}

impl FakeCluster {
    fn key<K: ClusterResource>(name: &str) -> (String, String) {
        (K::kind_name(), name.to_string())
    }

    fn record(&self, verb: &'static str, kind: String, name: &str) {
        self.ops.lock().unwrap().push(Op {
            verb,
            kind,
            name: name.to_string(),
        });
    }

    /// Store an object directly, bypassing the op log.
    pub fn put<K: ClusterResource>(&self, resource: &K) {
        let name = resource.meta().name.clone().unwrap();
        self.objects
            .lock()
            .unwrap()
            .insert(Self::key::<K>(&name), serde_json::to_value(resource).unwrap());
    }

    pub fn fetch<K: ClusterResource>(&self, name: &str) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&Self::key::<K>(name))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    pub fn has<K: ClusterResource>(&self, name: &str) -> bool {
        self.fetch::<K>(name).is_some()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    pub fn ops_with(&self, verb: &str) -> Vec<Op> {
        self.ops().into_iter().filter(|op| op.verb == verb).collect()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().unwrap().clear();
    }

    pub fn add_pod(&self, app: &str) {
        let mut pods = self.pods.lock().unwrap();
        let name = format!("{app}-pod-{}", pods.len());
        pods.push(Pod {
            metadata: ObjectMeta {
                name: Some(name),
                labels: Some(BTreeMap::from([("app".to_string(), app.to_string())])),
                ..Default::default()
            },
            ..Default::default()
        });
    }

    pub fn pod_count(&self) -> usize {
        self.pods.lock().unwrap().len()
    }

    /// Simulate the ingress layer issuing a certificate.
    pub fn issue_certificate(&self, name: &str) {
        self.put(&Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "tls.crt".to_string(),
                ByteString(b"cert".to_vec()),
            )])),
            ..Default::default()
        });
    }

    fn matches(pod: &Pod, selector: &str) -> bool {
        let Some((key, value)) = selector.split_once('=') else {
            return false;
        };
        pod.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .is_some_and(|v| v == value)
    }
}

fn conflict(what: &str) -> std::io::Error {
    std::io::Error::other(what.to_string())
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn get<K: ClusterResource>(&self, name: &str) -> Result<Option<K>, ClusterError> {
        Ok(self.fetch::<K>(name))
    }

    async fn create<K: ClusterResource>(&self, resource: &K) -> Result<K, ClusterError> {
        let name = resource.meta().name.clone().unwrap_or_default();
        let key = Self::key::<K>(&name);
        let mut value = serde_json::to_value(resource)
            .map_err(|e| ClusterError::request::<K>("create", &name, e))?;
        if key.0 == "Service"
            && self.assign_cluster_ips.load(Ordering::SeqCst)
            && value["spec"]["clusterIP"].is_null()
        {
            let n = self.next_ip.fetch_add(1, Ordering::SeqCst);
            value["spec"]["clusterIP"] = serde_json::json!(format!("10.0.0.{n}"));
        }

        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(ClusterError::request::<K>("create", &name, conflict("already exists")));
        }
        objects.insert(key.clone(), value.clone());
        drop(objects);
        self.record("create", key.0, &name);
        serde_json::from_value(value).map_err(|e| ClusterError::request::<K>("create", &name, e))
    }

    async fn replace<K: ClusterResource>(&self, resource: &K) -> Result<K, ClusterError> {
        let name = resource.meta().name.clone().unwrap_or_default();
        let key = Self::key::<K>(&name);
        let value = serde_json::to_value(resource)
            .map_err(|e| ClusterError::request::<K>("replace", &name, e))?;
        let mut objects = self.objects.lock().unwrap();
        if !objects.contains_key(&key) {
            return Err(ClusterError::request::<K>("replace", &name, conflict("not found")));
        }
        objects.insert(key.clone(), value);
        drop(objects);
        self.record("replace", key.0, &name);
        Ok(resource.clone())
    }

    async fn delete<K: ClusterResource>(&self, name: &str) -> Result<bool, ClusterError> {
        let key = Self::key::<K>(name);
        let existed = self.objects.lock().unwrap().remove(&key).is_some();
        if existed {
            self.record("delete", key.0, name);
        }
        Ok(existed)
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>, ClusterError> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|pod| Self::matches(pod, selector))
            .cloned()
            .collect())
    }

    async fn delete_pods(&self, selector: &str) -> Result<(), ClusterError> {
        self.pods
            .lock()
            .unwrap()
            .retain(|pod| !Self::matches(pod, selector));
        self.record("delete_pods", "Pod".to_string(), selector);
        Ok(())
    }
}

// ─── Record store ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeRecordStore {
    nodes: Mutex<HashMap<Uuid, StorageNode>>,
    seeds: Mutex<HashMap<Uuid, WalletSeed>>,
    history: Mutex<Vec<(Uuid, NodeStatus)>>,
    pub fail_fetch: AtomicBool,
    pub fail_seed_writes: AtomicBool,
}

impl FakeRecordStore {
    pub fn insert(&self, node: StorageNode) {
        self.nodes.lock().unwrap().insert(node.id, node);
    }

    pub fn node(&self, id: Uuid) -> StorageNode {
        self.nodes.lock().unwrap()[&id].clone()
    }

    pub fn set_status(&self, id: Uuid, status: NodeStatus) {
        self.nodes.lock().unwrap().get_mut(&id).unwrap().status = status;
    }

    pub fn set_gateways_requested(&self, id: Uuid, requested: u32) {
        self.nodes
            .lock()
            .unwrap()
            .get_mut(&id)
            .unwrap()
            .gateways_requested = requested;
    }

    /// Every status written for `id`, in order.
    pub fn history(&self, id: Uuid) -> Vec<NodeStatus> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|(node, _)| *node == id)
            .map(|(_, status)| status.clone())
            .collect()
    }

    pub fn seed(&self, id: Uuid) -> Option<WalletSeed> {
        self.seeds.lock().unwrap().get(&id).cloned()
    }

    pub fn put_seed(&self, id: Uuid, words: &str) {
        self.seeds
            .lock()
            .unwrap()
            .insert(id, WalletSeed::new(id, words));
    }

    fn check_fetch(&self, path: &str) -> Result<(), RecordStoreError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(RecordStoreError::Status {
                path: path.to_string(),
                status: 503,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FakeRecordStore {
    async fn pending_nodes(&self) -> Result<Vec<StorageNode>, RecordStoreError> {
        self.check_fetch("/sianodes/pending/all")?;
        let mut nodes: Vec<_> = self
            .nodes
            .lock()
            .unwrap()
            .values()
            .filter(|n| n.status.is_pending())
            .cloned()
            .collect();
        nodes.sort_by_key(|n| n.created_time);
        Ok(nodes)
    }

    async fn ready_unattached_nodes(&self) -> Result<Vec<StorageNode>, RecordStoreError> {
        self.check_fetch("/sianodes/orphaned/ready")?;
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .values()
            .filter(|n| n.status == NodeStatus::Ready && n.gateways_activated != n.gateways_requested)
            .cloned()
            .collect())
    }

    async fn update_status(&self, id: Uuid, status: &NodeStatus) -> Result<(), RecordStoreError> {
        self.set_status(id, status.clone());
        self.history.lock().unwrap().push((id, status.clone()));
        Ok(())
    }

    async fn update_gateways_activated(
        &self,
        id: Uuid,
        activated: u32,
    ) -> Result<(), RecordStoreError> {
        self.nodes
            .lock()
            .unwrap()
            .get_mut(&id)
            .unwrap()
            .gateways_activated = activated;
        Ok(())
    }

    async fn save_gateway_credentials(
        &self,
        id: Uuid,
        credentials: &GatewayCredentials,
    ) -> Result<(), RecordStoreError> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes.get_mut(&id).unwrap();
        node.gateway_access_key = credentials.access_key.clone();
        node.gateway_secret_key = credentials.secret_key.clone();
        Ok(())
    }

    async fn wallet_seed(&self, id: Uuid) -> Result<Option<WalletSeed>, RecordStoreError> {
        Ok(self.seed(id))
    }

    async fn create_wallet_seed(
        &self,
        id: Uuid,
        words: &str,
    ) -> Result<WalletSeed, RecordStoreError> {
        if self.fail_seed_writes.load(Ordering::SeqCst) {
            return Err(RecordStoreError::Status {
                path: format!("/wallets/{id}/seed"),
                status: 503,
            });
        }
        let seed = WalletSeed::new(id, words);
        self.seeds.lock().unwrap().insert(id, seed.clone());
        Ok(seed)
    }
}

/// Takes its pending-node snapshot, then lags before answering, so steps
/// spawned earlier can finish while the fetch is still outstanding.
pub struct LaggingStore {
    pub inner: Arc<FakeRecordStore>,
    pub lag: Duration,
}

#[async_trait]
impl RecordStore for LaggingStore {
    async fn pending_nodes(&self) -> Result<Vec<StorageNode>, RecordStoreError> {
        let nodes = self.inner.pending_nodes().await?;
        tokio::time::sleep(self.lag).await;
        Ok(nodes)
    }

    async fn ready_unattached_nodes(&self) -> Result<Vec<StorageNode>, RecordStoreError> {
        self.inner.ready_unattached_nodes().await
    }

    async fn update_status(&self, id: Uuid, status: &NodeStatus) -> Result<(), RecordStoreError> {
        self.inner.update_status(id, status).await
    }

    async fn update_gateways_activated(
        &self,
        id: Uuid,
        activated: u32,
    ) -> Result<(), RecordStoreError> {
        self.inner.update_gateways_activated(id, activated).await
    }

    async fn save_gateway_credentials(
        &self,
        id: Uuid,
        credentials: &GatewayCredentials,
    ) -> Result<(), RecordStoreError> {
        self.inner.save_gateway_credentials(id, credentials).await
    }

    async fn wallet_seed(&self, id: Uuid) -> Result<Option<WalletSeed>, RecordStoreError> {
        self.inner.wallet_seed(id).await
    }

    async fn create_wallet_seed(
        &self,
        id: Uuid,
        words: &str,
    ) -> Result<WalletSeed, RecordStoreError> {
        self.inner.create_wallet_seed(id, words).await
    }
}

// ─── Node APIs ──────────────────────────────────────────────────────────────

pub struct NodeState {
    pub reachable: bool,
    pub synced: bool,
    pub wallet: WalletInfo,
    /// Seed returned by a fresh wallet initialization.
    pub issued_seed: String,
    pub init_calls: usize,
    pub restored_from: Option<String>,
    pub address: String,
    pub sends: Vec<(Currency, String)>,
    pub fail_sends: bool,
    /// Sent coins show up as unconfirmed outgoing. When false they vanish
    /// from no balance field, as if the send never reached the pool.
    pub sends_leave_wallet: bool,
    pub allowance: Option<Allowance>,
    pub contracts: usize,
}

impl NodeState {
    fn new(address: &str) -> Self {
        Self {
            reachable: true,
            synced: true,
            wallet: WalletInfo::default(),
            issued_seed: "abbey abducts ability able".to_string(),
            init_calls: 0,
            restored_from: None,
            address: address.to_string(),
            sends: Vec::new(),
            fail_sends: false,
            sends_leave_wallet: true,
            allowance: None,
            contracts: 0,
        }
    }
}

pub struct FakeNode {
    pub state: Mutex<NodeState>,
}

impl FakeNode {
    pub fn new(address: &str) -> Self {
        Self {
            state: Mutex::new(NodeState::new(address)),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut NodeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn sends(&self) -> Vec<(Currency, String)> {
        self.with(|s| s.sends.clone())
    }

    fn unavailable(path: &'static str) -> NodeApiError {
        NodeApiError::Status {
            path,
            status: 502,
            message: "connection refused".to_string(),
        }
    }

    fn check(&self, path: &'static str) -> Result<(), NodeApiError> {
        if self.with(|s| s.reachable) {
            Ok(())
        } else {
            Err(Self::unavailable(path))
        }
    }
}

#[async_trait]
impl NodeClient for FakeNode {
    async fn consensus(&self) -> Result<ConsensusInfo, NodeApiError> {
        self.check("/consensus")?;
        Ok(self.with(|s| ConsensusInfo {
            synced: s.synced,
            height: 1200,
        }))
    }

    async fn wallet(&self) -> Result<WalletInfo, NodeApiError> {
        self.check("/wallet")?;
        Ok(self.with(|s| s.wallet.clone()))
    }

    async fn init_wallet(&self) -> Result<String, NodeApiError> {
        self.check("/wallet/init")?;
        Ok(self.with(|s| {
            s.init_calls += 1;
            s.wallet.encrypted = true;
            s.issued_seed.clone()
        }))
    }

    async fn init_wallet_from_seed(&self, seed: &str) -> Result<(), NodeApiError> {
        self.check("/wallet/init/seed")?;
        self.with(|s| {
            s.restored_from = Some(seed.to_string());
            s.wallet.encrypted = true;
        });
        Ok(())
    }

    async fn wallet_address(&self) -> Result<String, NodeApiError> {
        self.check("/wallet/address")?;
        Ok(self.with(|s| s.address.clone()))
    }

    async fn send_coins(
        &self,
        amount: Currency,
        destination: &str,
    ) -> Result<Vec<String>, NodeApiError> {
        self.check("/wallet/siacoins")?;
        self.with(|s| {
            if s.fail_sends {
                return Err(NodeApiError::Status {
                    path: "/wallet/siacoins",
                    status: 500,
                    message: "insufficient balance".to_string(),
                });
            }
            s.sends.push((amount, destination.to_string()));
            if s.sends_leave_wallet {
                s.wallet.unconfirmed_outgoing = s.wallet.unconfirmed_outgoing.saturating_add(amount);
            }
            Ok(vec![format!("txn-{}", s.sends.len())])
        })
    }

    async fn set_allowance(&self, allowance: &Allowance) -> Result<(), NodeApiError> {
        self.check("/renter")?;
        self.with(|s| s.allowance = Some(*allowance));
        Ok(())
    }

    async fn active_contracts(&self) -> Result<usize, NodeApiError> {
        self.check("/renter/contracts")?;
        Ok(self.with(|s| s.contracts))
    }
}

pub struct FakeConnector {
    pub node: Arc<FakeNode>,
    pub prime: Arc<FakeNode>,
    pub prime_missing: AtomicBool,
}

#[async_trait]
impl NodeConnector for FakeConnector {
    async fn node(&self, _node: &StorageNode) -> Result<Arc<dyn NodeClient>, ConnectError> {
        Ok(Arc::clone(&self.node) as Arc<dyn NodeClient>)
    }

    async fn prime(&self) -> Result<Arc<dyn NodeClient>, ConnectError> {
        if self.prime_missing.load(Ordering::SeqCst) {
            return Err(ConnectError::ServiceNotFound("sia-prime-service".to_string()));
        }
        Ok(Arc::clone(&self.prime) as Arc<dyn NodeClient>)
    }
}

// ─── Harness ────────────────────────────────────────────────────────────────

pub const NODE_ADDRESS: &str = "node-address-0001";
pub const PRIME_ADDRESS: &str = "prime-address-0001";

pub struct Harness {
    pub cluster: Arc<FakeCluster>,
    pub store: Arc<FakeRecordStore>,
    pub node: Arc<FakeNode>,
    pub prime: Arc<FakeNode>,
    pub connector: Arc<FakeConnector>,
    pub layout: ClusterLayout,
    pub reconciler: Arc<Reconciler<FakeCluster>>,
}

impl Harness {
    pub fn new() -> Self {
        let cluster = Arc::new(FakeCluster::default());
        let store = Arc::new(FakeRecordStore::default());
        let node = Arc::new(FakeNode::new(NODE_ADDRESS));
        let prime = Arc::new(FakeNode::new(PRIME_ADDRESS));
        let connector = Arc::new(FakeConnector {
            node: Arc::clone(&node),
            prime: Arc::clone(&prime),
            prime_missing: AtomicBool::new(false),
        });
        let layout = ClusterLayout::default();
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&cluster),
            Arc::clone(&store) as Arc<dyn RecordStore>,
            Arc::clone(&connector) as Arc<dyn NodeConnector>,
            layout.clone(),
            FundingPolicy::default(),
        ));
        Self {
            cluster,
            store,
            node,
            prime,
            connector,
            layout,
            reconciler,
        }
    }

    /// A node recorded in the store with the given status.
    pub fn add_node(&self, status: NodeStatus, capacity: f64) -> StorageNode {
        let mut node = StorageNode::new(Uuid::new_v4(), capacity);
        node.status = status;
        self.store.insert(node.clone());
        node
    }

    /// The store's current view of the node.
    pub fn current(&self, node: &StorageNode) -> StorageNode {
        self.store.node(node.id)
    }

    pub fn names(&self, node: &StorageNode) -> NodeNames {
        NodeNames::for_node(&self.layout.prefix, node)
    }

    /// Create the node's four baseline resources directly.
    pub fn provision_node_resources(&self, node: &StorageNode) {
        let names = self.names(node);
        self.cluster.put(&specs::node_volume_claim(&names, &self.layout));
        self.cluster.put(&specs::node_service(&names, &self.layout));
        self.cluster.put(&specs::node_secret(&names, &self.layout, ""));
        self.cluster.put(&specs::node_deployment(&names, &self.layout));
    }
}

pub fn coins(amount: &str) -> Currency {
    Currency::parse_coins(amount).unwrap()
}
