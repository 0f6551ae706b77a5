use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use shared_types::StorageNode;
use tracing::debug;

use crate::cluster::{specs, Cluster, ClusterError, ClusterMode};
use crate::naming::NodeNames;
use crate::node_api::{HttpNodeClient, NodeClient};

/// Where node APIs are reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEndpoints {
    /// Port of the node API on its service.
    pub api_port: u16,
    /// Service in front of the prime (funding) node.
    pub prime_service: String,
    /// Local tunnel to the node being reconciled, in external mode.
    pub node_tunnel_addr: String,
    /// Local tunnel to the prime node, in external mode.
    pub prime_tunnel_addr: String,
}

impl Default for NodeEndpoints {
    fn default() -> Self {
        Self {
            api_port: specs::NODE_API_PORT as u16,
            prime_service: "sia-prime-service".to_string(),
            node_tunnel_addr: "127.0.0.1:9980".to_string(),
            prime_tunnel_addr: "127.0.0.1:9985".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error("service {0} does not exist")]
    ServiceNotFound(String),
    #[error("service {0} has no cluster IP yet")]
    NoClusterIp(String),
}

/// Resolves API clients for a node and for the prime node.
#[async_trait]
pub trait NodeConnector: Send + Sync {
    async fn node(&self, node: &StorageNode) -> Result<Arc<dyn NodeClient>, ConnectError>;

    async fn prime(&self) -> Result<Arc<dyn NodeClient>, ConnectError>;
}

pub struct ClusterNodeConnector<C> {
    cluster: Arc<C>,
    http: reqwest::Client,
    password: String,
    prefix: String,
    endpoints: NodeEndpoints,
    mode: ClusterMode,
}

impl<C: Cluster> ClusterNodeConnector<C> {
    pub fn new(
        cluster: Arc<C>,
        http: reqwest::Client,
        password: String,
        prefix: String,
        endpoints: NodeEndpoints,
        mode: ClusterMode,
    ) -> Self {
        Self {
            cluster,
            http,
            password,
            prefix,
            endpoints,
            mode,
        }
    }

    async fn resolve(&self, service: &str, tunnel: &str) -> Result<String, ConnectError> {
        if self.mode == ClusterMode::External {
            debug!(
                service,
                tunnel,
                "using local tunnel (kubectl port-forward svc/{service} {}:{})",
                tunnel.rsplit(':').next().unwrap_or_default(),
                self.endpoints.api_port
            );
            return Ok(tunnel.to_string());
        }
        let svc = self
            .cluster
            .get::<Service>(service)
            .await?
            .ok_or_else(|| ConnectError::ServiceNotFound(service.to_string()))?;
        let ip = specs::cluster_ip(&svc)
            .ok_or_else(|| ConnectError::NoClusterIp(service.to_string()))?;
        Ok(format!("{ip}:{}", self.endpoints.api_port))
    }

    fn client(&self, address: &str) -> Arc<dyn NodeClient> {
        Arc::new(HttpNodeClient::new(
            self.http.clone(),
            address,
            &self.password,
        ))
    }
}

#[async_trait]
impl<C: Cluster> NodeConnector for ClusterNodeConnector<C> {
    async fn node(&self, node: &StorageNode) -> Result<Arc<dyn NodeClient>, ConnectError> {
        let names = NodeNames::for_node(&self.prefix, node);
        let address = self
            .resolve(names.base(), &self.endpoints.node_tunnel_addr)
            .await?;
        Ok(self.client(&address))
    }

    async fn prime(&self) -> Result<Arc<dyn NodeClient>, ConnectError> {
        let address = self
            .resolve(&self.endpoints.prime_service, &self.endpoints.prime_tunnel_addr)
            .await?;
        Ok(self.client(&address))
    }
}
