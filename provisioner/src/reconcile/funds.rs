use shared_types::{NodeStatus, StorageNode};
use tracing::{error, info};

use super::{Progress, ReconcileError, Reconciler};
use crate::cluster::Cluster;
use crate::funding::FundingPlan;
use crate::node_api::Allowance;

impl<C: Cluster> Reconciler<C> {
    fn plan(&self, node: &StorageNode) -> Result<FundingPlan, ReconcileError> {
        self.funding
            .plan(node.capacity)
            .map_err(|e| ReconcileError::invariant(node, e.to_string()))
    }

    /// `unlocked`: transfer the requested amount from the prime wallet.
    ///
    /// `funded` is persisted before the transfer is submitted, so a node can
    /// never be funded twice. A transfer that fails after that point is a
    /// [`ReconcileError::FundingIncident`].
    pub(super) async fn fund(&self, node: &StorageNode) -> Result<Progress, ReconcileError> {
        let plan = self.plan(node)?;
        let client = self.nodes.node(node).await?;
        let wallet = client.wallet().await?;

        if wallet.confirmed_balance >= plan.desired {
            info!(
                shortcode = %node.shortcode,
                balance = %wallet.confirmed_balance,
                desired = %plan.desired,
                "balance already covers the desired amount, skipping transfer"
            );
            self.advance(node, &NodeStatus::Unlocked, NodeStatus::Funded)
                .await?;
            return self
                .advance(node, &NodeStatus::Funded, NodeStatus::Confirmed)
                .await;
        }

        let prime = self.nodes.prime().await?;
        let address = client.wallet_address().await?;

        self.advance(node, &NodeStatus::Unlocked, NodeStatus::Funded)
            .await?;

        match prime.send_coins(plan.requested, &address).await {
            Ok(transactions) => {
                info!(
                    shortcode = %node.shortcode,
                    amount = %plan.requested,
                    transactions = transactions.len(),
                    "funding transfer submitted"
                );
                Ok(Progress::Advanced(NodeStatus::Funded))
            }
            Err(source) => {
                error!(
                    node_id = %node.id,
                    shortcode = %node.shortcode,
                    amount = %plan.requested,
                    "funding transfer failed after the node was marked funded: {source}"
                );
                Err(ReconcileError::FundingIncident {
                    node_id: node.id,
                    shortcode: node.shortcode.clone(),
                    source,
                })
            }
        }
    }

    /// `funded`: wait until the desired amount is confirmed on chain.
    pub(super) async fn await_confirmation(
        &self,
        node: &StorageNode,
    ) -> Result<Progress, ReconcileError> {
        let plan = self.plan(node)?;
        let client = self.nodes.node(node).await?;
        let wallet = client.wallet().await?;
        if wallet.confirmed_balance < plan.desired {
            return Ok(Progress::Waiting(format!(
                "confirmed {} of {}",
                wallet.confirmed_balance, plan.desired
            )));
        }
        self.advance(node, &NodeStatus::Funded, NodeStatus::Confirmed)
            .await
    }

    /// `confirmed`: submit the renter allowance.
    pub(super) async fn configure_allowance(
        &self,
        node: &StorageNode,
    ) -> Result<Progress, ReconcileError> {
        let plan = self.plan(node)?;
        let terms = self.funding.renter;
        let client = self.nodes.node(node).await?;
        client
            .set_allowance(&Allowance {
                funds: plan.allowance,
                hosts: terms.hosts,
                period: terms.period,
                renew_window: terms.renew_window,
            })
            .await?;
        info!(shortcode = %node.shortcode, funds = %plan.allowance, hosts = terms.hosts, "allowance set");
        self.advance(node, &NodeStatus::Confirmed, NodeStatus::Configured)
            .await
    }

    /// `configured`: wait for enough storage contracts to form.
    pub(super) async fn await_contracts(
        &self,
        node: &StorageNode,
    ) -> Result<Progress, ReconcileError> {
        let required = self.funding.renter.required_contracts;
        let client = self.nodes.node(node).await?;
        let active = client.active_contracts().await?;
        if active < required {
            return Ok(Progress::Waiting(format!(
                "{active} of {required} contracts formed"
            )));
        }
        self.advance(node, &NodeStatus::Configured, NodeStatus::Ready)
            .await
    }
}
