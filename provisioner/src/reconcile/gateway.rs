use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{PersistentVolume, PersistentVolumeClaim, Secret, Service},
    networking::v1::Ingress,
};
use shared_types::{GatewayCredentials, NodeStatus, StorageNode};
use tracing::{debug, info};

use super::{Progress, ReconcileError, Reconciler};
use crate::cluster::{ensure, mounts, remove, specs, Cluster};
use crate::naming::{GatewayNames, NodeNames};

enum Attachment {
    Active,
    Pending(String),
}

impl<C: Cluster> Reconciler<C> {
    /// Bring a ready node's activated gateway count toward its requested one.
    ///
    /// Instances activate in index order and the counter moves by one per
    /// instance whose certificate has been issued. A lowered request tears
    /// the surplus instances down, highest index first.
    pub async fn attach_gateways(&self, node: &StorageNode) -> Result<Progress, ReconcileError> {
        if node.status != NodeStatus::Ready {
            return Ok(Progress::Waiting(format!("node is {}", node.status)));
        }
        let names = self.names(node);
        let requested = node.gateways_requested;

        if node.gateways_activated > requested {
            for index in (requested..node.gateways_activated).rev() {
                self.teardown_gateway(&names, index).await?;
            }
            self.store
                .update_gateways_activated(node.id, requested)
                .await?;
            info!(shortcode = %node.shortcode, from = node.gateways_activated, to = requested, "gateways reduced");
            return Ok(Progress::Gateways {
                activated: requested,
            });
        }
        if node.gateways_activated == requested {
            return Ok(Progress::Idle);
        }

        let credentials = match node.gateway_credentials() {
            Some(credentials) => credentials,
            None => {
                let credentials = GatewayCredentials::generate();
                self.store
                    .save_gateway_credentials(node.id, &credentials)
                    .await?;
                info!(shortcode = %node.shortcode, "gateway credentials generated");
                credentials
            }
        };

        let mut activated = node.gateways_activated;
        while activated < requested {
            match self
                .ensure_gateway(&names, activated, &credentials)
                .await?
            {
                Attachment::Active => {
                    activated += 1;
                    self.store
                        .update_gateways_activated(node.id, activated)
                        .await?;
                    info!(shortcode = %node.shortcode, activated, requested, "gateway activated");
                }
                Attachment::Pending(reason) => {
                    debug!(shortcode = %node.shortcode, index = activated, %reason, "gateway pending");
                    if activated == node.gateways_activated {
                        return Ok(Progress::Waiting(reason));
                    }
                    break;
                }
            }
        }
        Ok(Progress::Gateways { activated })
    }

    async fn ensure_gateway(
        &self,
        names: &NodeNames,
        index: u32,
        credentials: &GatewayCredentials,
    ) -> Result<Attachment, ReconcileError> {
        let gw = names.gateway(index);
        let layout = &self.layout;
        let cluster = &*self.cluster;

        ensure::<_, PersistentVolumeClaim, _>(cluster, &gw.nfs, || {
            specs::nfs_backing_claim(&gw, layout)
        })
        .await?;
        let nfs_service =
            ensure::<_, Service, _>(cluster, &gw.nfs, || specs::nfs_service(&gw, layout))
                .await?
                .into_inner();
        ensure::<_, Deployment, _>(cluster, &gw.nfs, || specs::nfs_deployment(&gw, layout))
            .await?;

        let Some(server) = specs::cluster_ip(&nfs_service) else {
            return Ok(Attachment::Pending(format!(
                "service {} has no cluster IP yet",
                gw.nfs
            )));
        };
        ensure::<_, PersistentVolume, _>(cluster, &gw.nfs_volume, || {
            specs::nfs_volume(&gw, &server, layout)
        })
        .await?;
        ensure::<_, PersistentVolumeClaim, _>(cluster, &gw.nfs_claim, || {
            specs::gateway_claim(&gw, layout)
        })
        .await?;

        self.mount_on_node(names, &gw).await?;

        ensure::<_, Service, _>(cluster, &gw.name, || specs::gateway_service(&gw, layout)).await?;
        ensure::<_, Secret, _>(cluster, &gw.name, || {
            specs::gateway_secret(&gw, layout, credentials)
        })
        .await?;
        ensure::<_, Deployment, _>(cluster, &gw.name, || {
            specs::gateway_deployment(&gw, names, layout)
        })
        .await?;
        ensure::<_, Ingress, _>(cluster, &gw.name, || specs::gateway_ingress(&gw, layout)).await?;

        match cluster.get::<Secret>(&gw.cert).await? {
            Some(cert) if specs::has_data(&cert) => Ok(Attachment::Active),
            _ => Ok(Attachment::Pending(format!(
                "certificate {} not issued yet",
                gw.cert
            ))),
        }
    }

    async fn mount_on_node(&self, names: &NodeNames, gw: &GatewayNames) -> Result<(), ReconcileError> {
        let deployment = self
            .cluster
            .get::<Deployment>(names.base())
            .await?
            .ok_or_else(|| ReconcileError::missing::<Deployment>(names.base()))?;
        let (updated, changed) = mounts::with_claim_mounted(&deployment, &gw.node_mount());
        if changed {
            self.cluster.replace(&updated).await?;
            info!(deployment = names.base(), claim = %gw.nfs_claim, path = %gw.mount_path, "gateway volume mounted on node");
        }
        Ok(())
    }

    /// Remove every resource of gateway instance `index`. Absent resources
    /// are skipped.
    pub(super) async fn teardown_gateway(
        &self,
        names: &NodeNames,
        index: u32,
    ) -> Result<(), ReconcileError> {
        let gw = names.gateway(index);
        let cluster = &*self.cluster;

        remove::<_, Ingress>(cluster, &gw.name).await?;
        remove::<_, Deployment>(cluster, &gw.name).await?;
        remove::<_, Secret>(cluster, &gw.name).await?;
        remove::<_, Service>(cluster, &gw.name).await?;

        if let Some(deployment) = cluster.get::<Deployment>(names.base()).await? {
            let (updated, changed) = mounts::without_claim_mounted(&deployment, &gw.nfs_claim);
            if changed {
                cluster.replace(&updated).await?;
                info!(deployment = names.base(), claim = %gw.nfs_claim, "gateway volume unmounted from node");
            }
        }

        remove::<_, PersistentVolumeClaim>(cluster, &gw.nfs_claim).await?;
        remove::<_, PersistentVolume>(cluster, &gw.nfs_volume).await?;
        remove::<_, Deployment>(cluster, &gw.nfs).await?;
        remove::<_, Service>(cluster, &gw.nfs).await?;
        remove::<_, PersistentVolumeClaim>(cluster, &gw.nfs).await?;
        Ok(())
    }
}
