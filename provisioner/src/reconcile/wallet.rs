use k8s_openapi::api::core::v1::Secret;
use shared_types::{NodeStatus, StorageNode};
use tracing::{debug, error, info, warn};

use super::{Progress, ReconcileError, Reconciler};
use crate::cluster::{specs, Cluster};

impl<C: Cluster> Reconciler<C> {
    /// `instanced`: the node API answers at all.
    pub(super) async fn await_api(&self, node: &StorageNode) -> Result<Progress, ReconcileError> {
        let client = self.nodes.node(node).await?;
        match client.consensus().await {
            Ok(_) => {
                self.advance(node, &NodeStatus::Instanced, NodeStatus::Snapshotted)
                    .await
            }
            Err(e) => {
                debug!(shortcode = %node.shortcode, "node API not answering yet: {e}");
                Ok(Progress::Waiting("node API not answering".to_string()))
            }
        }
    }

    /// `snapshotted`: the node reports itself in sync with the chain.
    pub(super) async fn await_sync(&self, node: &StorageNode) -> Result<Progress, ReconcileError> {
        let client = self.nodes.node(node).await?;
        let consensus = match client.consensus().await {
            Ok(consensus) => consensus,
            Err(e) => {
                warn!(shortcode = %node.shortcode, "consensus query failed: {e}");
                return Ok(Progress::Waiting("consensus query failed".to_string()));
            }
        };
        if !consensus.synced {
            return Ok(Progress::Waiting(format!(
                "chain syncing at height {}",
                consensus.height
            )));
        }
        self.advance(node, &NodeStatus::Snapshotted, NodeStatus::Synchronized)
            .await
    }

    /// `synchronized`: create or restore the wallet, record its seed, and
    /// hand the seed to the node as its wallet password.
    ///
    /// Order matters for recovery: the seed is recorded before the secret is
    /// touched, and an encrypted wallet is only accepted when its seed is on
    /// record.
    pub(super) async fn initialize_wallet(
        &self,
        node: &StorageNode,
    ) -> Result<Progress, ReconcileError> {
        let names = self.names(node);
        let client = self.nodes.node(node).await?;
        let recorded = self
            .store
            .wallet_seed(node.id)
            .await?
            .filter(|seed| !seed.words.trim().is_empty());
        let wallet = client.wallet().await?;

        let words = match recorded {
            Some(seed) if wallet.encrypted => {
                debug!(shortcode = %node.shortcode, "wallet already initialized");
                seed.words
            }
            Some(seed) => {
                client.init_wallet_from_seed(&seed.words).await?;
                info!(shortcode = %node.shortcode, "wallet restored from recorded seed");
                seed.words
            }
            None if wallet.encrypted => {
                return Err(ReconcileError::invariant(
                    node,
                    "wallet is initialized but no seed is on record",
                ));
            }
            None => {
                let words = client.init_wallet().await?;
                if words.trim().is_empty() {
                    return Err(ReconcileError::invariant(
                        node,
                        "wallet initialization returned an empty seed",
                    ));
                }
                if let Err(source) = self.store.create_wallet_seed(node.id, &words).await {
                    error!(
                        node_id = %node.id,
                        shortcode = %node.shortcode,
                        "wallet initialized but its seed could not be recorded: {source}"
                    );
                    return Err(ReconcileError::SeedNotRecorded {
                        node_id: node.id,
                        shortcode: node.shortcode.clone(),
                        source,
                    });
                }
                info!(shortcode = %node.shortcode, "wallet initialized and seed recorded");
                words
            }
        };

        let secret = self
            .cluster
            .get::<Secret>(names.base())
            .await?
            .ok_or_else(|| ReconcileError::missing::<Secret>(names.base()))?;
        if specs::wallet_password(&secret) == Some(words.as_bytes()) {
            debug!(shortcode = %node.shortcode, "wallet password already in place");
        } else {
            self.cluster
                .replace(&specs::with_wallet_password(&secret, &words))
                .await?;
            info!(shortcode = %node.shortcode, "wallet password stored, restarting node pods");
            self.cluster.delete_pods(&names.selector()).await?;
        }

        self.advance(node, &NodeStatus::Synchronized, NodeStatus::Initialized)
            .await
    }

    /// `initialized`: wait for the restarted node to unlock its wallet.
    pub(super) async fn await_unlock(&self, node: &StorageNode) -> Result<Progress, ReconcileError> {
        let client = self.nodes.node(node).await?;
        match client.wallet().await {
            Ok(wallet) if wallet.unlocked => {
                self.advance(node, &NodeStatus::Initialized, NodeStatus::Unlocked)
                    .await
            }
            Ok(_) => Ok(Progress::Waiting("wallet still locked".to_string())),
            Err(e) => {
                debug!(shortcode = %node.shortcode, "wallet query failed: {e}");
                Ok(Progress::Waiting("wallet query failed".to_string()))
            }
        }
    }
}
