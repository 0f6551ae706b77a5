//! Cluster access for the reconciler.
//!
//! The reconciler only ever looks resources up by name, creates them when
//! absent, replaces a deployment after editing its mounts, and deletes by
//! name. [`Cluster`] is that surface; [`KubeCluster`] backs it with kube-rs
//! and the integration tests back it with an in-memory map.

pub mod kubernetes;
pub mod mounts;
pub mod specs;

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{PersistentVolume, PersistentVolumeClaim, Pod, Secret, Service},
    networking::v1::Ingress,
};
use kube::{Api, Client, Resource};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

pub use kubernetes::{ClusterMode, KubeCluster};

/// A resource kind the reconciler manages.
pub trait ClusterResource:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn api(client: Client, namespace: &str) -> Api<Self>;

    fn kind_name() -> String {
        Self::kind(&()).into_owned()
    }
}

macro_rules! namespaced_resource {
    ($($kind:ty),* $(,)?) => {
        $(
            impl ClusterResource for $kind {
                fn api(client: Client, namespace: &str) -> Api<Self> {
                    Api::namespaced(client, namespace)
                }
            }
        )*
    };
}

namespaced_resource!(PersistentVolumeClaim, Service, Secret, Deployment, Ingress, Pod);

impl ClusterResource for PersistentVolume {
    fn api(client: Client, _namespace: &str) -> Api<Self> {
        Api::all(client)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("cluster {verb} {kind}/{name} failed: {source}")]
    Request {
        verb: &'static str,
        kind: String,
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("no usable cluster credentials: {0}")]
    Credentials(String),
}

impl ClusterError {
    pub fn request<K: ClusterResource>(
        verb: &'static str,
        name: &str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Request {
            verb,
            kind: K::kind_name(),
            name: name.to_string(),
            source: Box::new(source),
        }
    }
}

/// Name-addressed access to the namespace the provisioner manages.
#[async_trait]
pub trait Cluster: Send + Sync + 'static {
    async fn get<K: ClusterResource>(&self, name: &str) -> Result<Option<K>, ClusterError>;

    async fn create<K: ClusterResource>(&self, resource: &K) -> Result<K, ClusterError>;

    /// Replace the stored object named by `resource.metadata.name`.
    async fn replace<K: ClusterResource>(&self, resource: &K) -> Result<K, ClusterError>;

    /// Returns `false` when nothing by that name existed.
    async fn delete<K: ClusterResource>(&self, name: &str) -> Result<bool, ClusterError>;

    async fn list_pods(&self, selector: &str) -> Result<Vec<Pod>, ClusterError>;

    async fn delete_pods(&self, selector: &str) -> Result<(), ClusterError>;
}

/// Outcome of [`ensure`].
#[derive(Debug, Clone)]
pub enum Ensured<K> {
    Found(K),
    Created(K),
}

impl<K> Ensured<K> {
    pub fn into_inner(self) -> K {
        match self {
            Ensured::Found(k) | Ensured::Created(k) => k,
        }
    }
}

/// Look `name` up and create it from `build` only if it is absent.
///
/// An existing resource is returned untouched, even if it no longer matches
/// what `build` would produce.
pub async fn ensure<C, K, F>(cluster: &C, name: &str, build: F) -> Result<Ensured<K>, ClusterError>
where
    C: Cluster,
    K: ClusterResource,
    F: FnOnce() -> K,
{
    let kind = K::kind_name();
    if let Some(existing) = cluster.get::<K>(name).await? {
        debug!(%kind, name, "found");
        return Ok(Ensured::Found(existing));
    }
    info!(%kind, name, "creating");
    let created = cluster.create(&build()).await?;
    Ok(Ensured::Created(created))
}

/// Delete `name`, treating an already-absent resource as success.
pub async fn remove<C, K>(cluster: &C, name: &str) -> Result<(), ClusterError>
where
    C: Cluster,
    K: ClusterResource,
{
    let kind = K::kind_name();
    if cluster.delete::<K>(name).await? {
        info!(%kind, name, "deleted");
    } else {
        debug!(%kind, name, "already gone");
    }
    Ok(())
}
