use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{PersistentVolumeClaim, Secret, Service},
};
use shared_types::{NodeStatus, StorageNode};
use tracing::info;

use super::{Progress, ReconcileError, Reconciler};
use crate::cluster::{remove, Cluster};

impl<C: Cluster> Reconciler<C> {
    /// `stopping`: return the node's balance to the prime wallet, then remove
    /// every gateway instance and the node's own resources.
    ///
    /// Nothing is torn down while any sweepable balance remains.
    pub(super) async fn decommission(&self, node: &StorageNode) -> Result<Progress, ReconcileError> {
        let client = self.nodes.node(node).await?;

        let balance = self.funding.sweepable(&client.wallet().await?);
        if !balance.is_zero() {
            let prime = self.nodes.prime().await?;
            let address = prime.wallet_address().await?;
            client.send_coins(balance, &address).await?;
            info!(shortcode = %node.shortcode, amount = %balance, "balance returned to prime wallet");
        }

        let remaining = self.funding.sweepable(&client.wallet().await?);
        if !remaining.is_zero() {
            info!(shortcode = %node.shortcode, %remaining, "waiting for sweep to settle");
            return Ok(Progress::Waiting(format!("{remaining} still to sweep")));
        }

        let names = self.names(node);
        let instances = node.gateways_requested.max(node.gateways_activated);
        for index in 0..instances {
            self.teardown_gateway(&names, index).await?;
        }

        let cluster = &*self.cluster;
        remove::<_, Deployment>(cluster, names.base()).await?;
        remove::<_, Secret>(cluster, names.base()).await?;
        remove::<_, Service>(cluster, names.base()).await?;
        remove::<_, PersistentVolumeClaim>(cluster, names.base()).await?;
        info!(shortcode = %node.shortcode, instances, "node resources removed");

        self.advance(node, &NodeStatus::Stopping, NodeStatus::Stopped)
            .await
    }
}
