use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{PersistentVolumeClaim, Secret, Service},
};
use shared_types::{NodeStatus, StorageNode};
use tracing::debug;

use super::{Progress, ReconcileError, Reconciler};
use crate::cluster::{ensure, specs, Cluster};

impl<C: Cluster> Reconciler<C> {
    /// `created`: make sure the node's claim, service, secret and deployment
    /// exist, then move to `deployed`.
    pub(super) async fn deploy(&self, node: &StorageNode) -> Result<Progress, ReconcileError> {
        let names = self.names(node);
        let layout = &self.layout;
        let cluster = &*self.cluster;

        ensure::<_, PersistentVolumeClaim, _>(cluster, names.base(), || {
            specs::node_volume_claim(&names, layout)
        })
        .await?;
        ensure::<_, Service, _>(cluster, names.base(), || specs::node_service(&names, layout))
            .await?;

        // A seed on record means the wallet was set up before; the secret
        // must carry it or the node cannot unlock.
        let password = self
            .store
            .wallet_seed(node.id)
            .await?
            .map(|seed| seed.words)
            .unwrap_or_default();
        ensure::<_, Secret, _>(cluster, names.base(), || {
            specs::node_secret(&names, layout, &password)
        })
        .await?;

        ensure::<_, Deployment, _>(cluster, names.base(), || {
            specs::node_deployment(&names, layout)
        })
        .await?;

        self.advance(node, &NodeStatus::Created, NodeStatus::Deployed)
            .await
    }

    /// `deployed`: wait for at least one pod matching the node's label.
    pub(super) async fn await_pod(&self, node: &StorageNode) -> Result<Progress, ReconcileError> {
        let names = self.names(node);
        let pods = self.cluster.list_pods(&names.selector()).await?;
        if pods.is_empty() {
            debug!(shortcode = %node.shortcode, "no pod scheduled yet");
            return Ok(Progress::Waiting("no pod scheduled yet".to_string()));
        }
        self.advance(node, &NodeStatus::Deployed, NodeStatus::Instanced)
            .await
    }
}
