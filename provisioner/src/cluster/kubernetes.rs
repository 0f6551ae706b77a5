use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{DeleteParams, ListParams, PostParams, PropagationPolicy},
    config::KubeConfigOptions,
    Client, Config, ResourceExt,
};
use tracing::{info, warn};

use super::{Cluster, ClusterError, ClusterResource};

/// How the provisioner reaches the cluster, and therefore the node APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterMode {
    /// Running as a pod; service cluster IPs are routable.
    Internal,
    /// Running on a workstation against a kubeconfig; node APIs are reached
    /// through local port-forward tunnels.
    External,
}

impl std::fmt::Display for ClusterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterMode::Internal => write!(f, "internal"),
            ClusterMode::External => write!(f, "external"),
        }
    }
}

pub struct KubeCluster {
    client: Client,
    namespace: String,
    mode: ClusterMode,
}

impl KubeCluster {
    /// A kubeconfig wins over in-cluster credentials.
    pub async fn connect(namespace: &str) -> Result<Self, ClusterError> {
        let (config, mode) = match Config::from_kubeconfig(&KubeConfigOptions::default()).await {
            Ok(config) => (config, ClusterMode::External),
            Err(kubeconfig_err) => match Config::incluster() {
                Ok(config) => (config, ClusterMode::Internal),
                Err(incluster_err) => {
                    return Err(ClusterError::Credentials(format!(
                        "kubeconfig: {kubeconfig_err}; in-cluster: {incluster_err}"
                    )))
                }
            },
        };
        let client =
            Client::try_from(config).map_err(|e| ClusterError::Credentials(e.to_string()))?;
        info!(namespace, %mode, "connected to cluster");
        if mode == ClusterMode::External {
            warn!("external cluster: node APIs are expected on local port-forward tunnels");
        }
        Ok(Self {
            client,
            namespace: namespace.to_string(),
            mode,
        })
    }

    pub fn mode(&self) -> ClusterMode {
        self.mode
    }

    fn api<K: ClusterResource>(&self) -> kube::Api<K> {
        K::api(self.client.clone(), &self.namespace)
    }
}

fn delete_params() -> DeleteParams {
    DeleteParams {
        grace_period_seconds: Some(60),
        propagation_policy: Some(PropagationPolicy::Foreground),
        ..DeleteParams::default()
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn get<K: ClusterResource>(&self, name: &str) -> Result<Option<K>, ClusterError> {
        self.api::<K>()
            .get_opt(name)
            .await
            .map_err(|e| ClusterError::request::<K>("get", name, e))
    }

    async fn create<K: ClusterResource>(&self, resource: &K) -> Result<K, ClusterError> {
        let name = resource.name_any();
        self.api::<K>()
            .create(&PostParams::default(), resource)
            .await
            .map_err(|e| ClusterError::request::<K>("create", &name, e))
    }

    async fn replace<K: ClusterResource>(&self, resource: &K) -> Result<K, ClusterError> {
        let name = resource.name_any();
        self.api::<K>()
            .replace(&name, &PostParams::default(), resource)
            .await
            .map_err(|e| ClusterError::request::<K>("replace", &name, e))
    }

    async fn delete<K: ClusterResource>(&self, name: &str) -> Result<bool, ClusterError> {
        match self.api::<K>().delete(name, &delete_params()).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(ClusterError::request::<K>("delete", name, e)),
        }
    }

    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>, ClusterError> {
        self.api::<Pod>()
            .list(&ListParams::default().labels(selector))
            .await
            .map(|list| list.items)
            .map_err(|e| ClusterError::request::<Pod>("list", selector, e))
    }

    async fn delete_pods(&self, selector: &str) -> Result<(), ClusterError> {
        self.api::<Pod>()
            .delete_collection(&delete_params(), &ListParams::default().labels(selector))
            .await
            .map(|_| ())
            .map_err(|e| ClusterError::request::<Pod>("delete", selector, e))
    }
}
