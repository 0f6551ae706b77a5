//! Deterministic cluster resource names.
//!
//! Every lookup the reconciler performs is by name, so these functions are
//! the only place names are formed:
//!
//! - node resources: `<prefix>-<shortcode>`
//! - gateway instance `i`: `<prefix>-<shortcode>-gw<i>`, with its NFS backing
//!   under `<prefix>-<shortcode>-gw<i>-nfs` (`-pv` / `-pvc` for the shared
//!   volume and its read-write-many claim)

use shared_types::StorageNode;

use crate::cluster::mounts::ClaimMount;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeNames {
    shortcode: String,
    base: String,
}

impl NodeNames {
    pub fn new(prefix: &str, shortcode: &str) -> Self {
        Self {
            shortcode: shortcode.to_string(),
            base: format!("{prefix}-{shortcode}"),
        }
    }

    pub fn for_node(prefix: &str, node: &StorageNode) -> Self {
        Self::new(prefix, &node.shortcode)
    }

    /// Name shared by the node's volume claim, service, secret and deployment.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Value of the `app` label on the node's pods.
    pub fn app(&self) -> &str {
        &self.base
    }

    pub fn selector(&self) -> String {
        format!("app={}", self.app())
    }

    pub fn gateway(&self, index: u32) -> GatewayNames {
        let name = format!("{}-gw{index}", self.base);
        let nfs = format!("{name}-nfs");
        GatewayNames {
            index,
            hostname_label: format!("{}-gw{index}", self.shortcode),
            nfs_volume: format!("{nfs}-pv"),
            nfs_claim: format!("{nfs}-pvc"),
            cert: format!("{name}-cert"),
            mount_path: format!("/gateway{}", index + 1),
            nfs,
            name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayNames {
    pub index: u32,
    /// Gateway service, secret, deployment and ingress.
    pub name: String,
    /// NFS backing claim, service and deployment.
    pub nfs: String,
    /// Cluster-wide persistent volume exported by the NFS server.
    pub nfs_volume: String,
    /// Read-write-many claim bound to `nfs_volume`.
    pub nfs_claim: String,
    /// TLS secret filled in by the ingress layer.
    pub cert: String,
    /// Where the shared volume is mounted, in both the gateway and the node.
    pub mount_path: String,
    hostname_label: String,
}

impl GatewayNames {
    pub fn hostname(&self, domain: &str) -> String {
        format!("{}.{domain}", self.hostname_label)
    }

    pub fn cache_dir(&self) -> String {
        format!("{}/siacache", self.mount_path)
    }

    pub fn db_file(&self) -> String {
        format!("{}/sia.db", self.mount_path)
    }

    /// The read-only mount added to the node's own deployment.
    pub fn node_mount(&self) -> ClaimMount {
        ClaimMount {
            volume_name: self.nfs_claim.clone(),
            claim_name: self.nfs_claim.clone(),
            mount_path: self.mount_path.clone(),
            read_only: true,
        }
    }
}
