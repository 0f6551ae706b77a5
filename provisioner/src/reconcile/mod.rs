//! Per-node reconciliation.
//!
//! [`Reconciler::step`] performs at most one forward move of a node's
//! lifecycle: it looks at the node's recorded status, converges whatever that
//! status depends on, and persists the next status once the precondition for
//! it is observed. A step that finds its precondition unmet returns
//! [`Progress::Waiting`] and is retried on a later poll.
//!
//! Handlers are split by phase:
//! - `deploy`: cluster resources and pod observation
//! - `wallet`: node API availability, chain sync, wallet setup
//! - `funds`: funding transfer, confirmation, renter allowance, contracts
//! - `gateway`: gateway instance attachment and teardown
//! - `decommission`: balance sweep and teardown of a stopping node

mod decommission;
mod deploy;
mod funds;
mod gateway;
mod wallet;

use std::sync::Arc;

use shared_types::{NodeStatus, StorageNode};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cluster::{Cluster, ClusterError};
use crate::config::ClusterLayout;
use crate::connector::{ConnectError, NodeConnector};
use crate::funding::FundingPolicy;
use crate::naming::NodeNames;
use crate::node_api::NodeApiError;
use crate::record_store::{RecordStore, RecordStoreError};

/// What a single step achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// The node's status was persisted as the given value.
    Advanced(NodeStatus),
    /// A precondition is not met yet.
    Waiting(String),
    /// The gateway pass finished with this many instances activated.
    Gateways { activated: u32 },
    /// Nothing to do for this status.
    Idle,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error(transparent)]
    NodeApi(#[from] NodeApiError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    RecordStore(#[from] RecordStoreError),
    #[error("{kind} {name} is missing")]
    MissingResource { kind: String, name: String },
    #[error("node {shortcode}: {reason}")]
    Invariant { shortcode: String, reason: String },
    /// The node is recorded as funded but the transfer did not go through.
    /// Needs an operator; the node is never funded twice automatically.
    #[error("node {node_id} ({shortcode}) is marked funded but the transfer failed: {source}")]
    FundingIncident {
        node_id: Uuid,
        shortcode: String,
        #[source]
        source: NodeApiError,
    },
    /// The node's wallet was initialized but its seed could not be recorded.
    /// Every later pass sees an encrypted wallet with no seed on record.
    #[error("node {node_id} ({shortcode}) has an initialized wallet whose seed was not recorded: {source}")]
    SeedNotRecorded {
        node_id: Uuid,
        shortcode: String,
        #[source]
        source: RecordStoreError,
    },
    #[error("node {shortcode}: refusing to move from {from} to {to}")]
    InvalidTransition {
        shortcode: String,
        from: NodeStatus,
        to: NodeStatus,
    },
}

impl ReconcileError {
    /// Transient errors clear up on their own and are retried on the next poll.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReconcileError::Cluster(_)
                | ReconcileError::NodeApi(_)
                | ReconcileError::Connect(_)
                | ReconcileError::RecordStore(_)
                | ReconcileError::MissingResource { .. }
        )
    }

    fn invariant(node: &StorageNode, reason: impl Into<String>) -> Self {
        ReconcileError::Invariant {
            shortcode: node.shortcode.clone(),
            reason: reason.into(),
        }
    }

    fn missing<K: crate::cluster::ClusterResource>(name: &str) -> Self {
        ReconcileError::MissingResource {
            kind: K::kind_name(),
            name: name.to_string(),
        }
    }
}

pub struct Reconciler<C> {
    cluster: Arc<C>,
    store: Arc<dyn RecordStore>,
    nodes: Arc<dyn NodeConnector>,
    layout: ClusterLayout,
    funding: FundingPolicy,
}

impl<C: Cluster> Reconciler<C> {
    pub fn new(
        cluster: Arc<C>,
        store: Arc<dyn RecordStore>,
        nodes: Arc<dyn NodeConnector>,
        layout: ClusterLayout,
        funding: FundingPolicy,
    ) -> Self {
        Self {
            cluster,
            store,
            nodes,
            layout,
            funding,
        }
    }

    fn names(&self, node: &StorageNode) -> NodeNames {
        NodeNames::for_node(&self.layout.prefix, node)
    }

    /// Drive `node` at most one status forward.
    pub async fn step(&self, node: &StorageNode) -> Result<Progress, ReconcileError> {
        debug!(shortcode = %node.shortcode, status = %node.status, "reconciling");
        match &node.status {
            NodeStatus::Created => self.deploy(node).await,
            NodeStatus::Deployed => self.await_pod(node).await,
            NodeStatus::Instanced => self.await_api(node).await,
            NodeStatus::Snapshotted => self.await_sync(node).await,
            NodeStatus::Synchronized => self.initialize_wallet(node).await,
            NodeStatus::Initialized => self.await_unlock(node).await,
            NodeStatus::Unlocked => self.fund(node).await,
            NodeStatus::Funded => self.await_confirmation(node).await,
            NodeStatus::Confirmed => self.configure_allowance(node).await,
            NodeStatus::Configured => self.await_contracts(node).await,
            NodeStatus::Stopping => self.decommission(node).await,
            NodeStatus::Ready | NodeStatus::Stopped | NodeStatus::Depleted | NodeStatus::Error => {
                Ok(Progress::Idle)
            }
            NodeStatus::Unknown(raw) => {
                warn!(shortcode = %node.shortcode, status = %raw, "unrecognized status, leaving node alone");
                Ok(Progress::Idle)
            }
        }
    }

    /// Persist `from -> to`, refusing anything but a single legal move.
    async fn advance(
        &self,
        node: &StorageNode,
        from: &NodeStatus,
        to: NodeStatus,
    ) -> Result<Progress, ReconcileError> {
        if !from.can_advance_to(&to) {
            return Err(ReconcileError::InvalidTransition {
                shortcode: node.shortcode.clone(),
                from: from.clone(),
                to,
            });
        }
        self.store.update_status(node.id, &to).await?;
        info!(shortcode = %node.shortcode, %from, %to, "status advanced");
        Ok(Progress::Advanced(to))
    }
}
