//! Gateway attachment for ready nodes.

mod common;

use common::Harness;
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{PersistentVolume, PersistentVolumeClaim, Secret, Service},
    networking::v1::Ingress,
};
use provisioner::{cluster::specs, naming::NodeNames, reconcile::Progress};
use shared_types::{NodeStatus, StorageNode};

fn ready_node(h: &Harness, requested: u32) -> StorageNode {
    let node = h.add_node(NodeStatus::Ready, 1.0);
    h.store.set_gateways_requested(node.id, requested);
    h.provision_node_resources(&node);
    h.current(&node)
}

fn node_mount_paths(h: &Harness, names: &NodeNames) -> Vec<String> {
    let deployment = h.cluster.fetch::<Deployment>(names.base()).unwrap();
    let pod = deployment.spec.unwrap().template.spec.unwrap();
    pod.containers[0]
        .volume_mounts
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(|m| m.mount_path)
        .collect()
}

fn assert_instance_present(h: &Harness, names: &NodeNames, index: u32) {
    let gw = names.gateway(index);
    assert!(h.cluster.has::<PersistentVolumeClaim>(&gw.nfs));
    assert!(h.cluster.has::<Service>(&gw.nfs));
    assert!(h.cluster.has::<Deployment>(&gw.nfs));
    assert!(h.cluster.has::<PersistentVolume>(&gw.nfs_volume));
    assert!(h.cluster.has::<PersistentVolumeClaim>(&gw.nfs_claim));
    assert!(h.cluster.has::<Service>(&gw.name));
    assert!(h.cluster.has::<Secret>(&gw.name));
    assert!(h.cluster.has::<Deployment>(&gw.name));
    assert!(h.cluster.has::<Ingress>(&gw.name));
}

fn assert_instance_absent(h: &Harness, names: &NodeNames, index: u32) {
    let gw = names.gateway(index);
    assert!(!h.cluster.has::<PersistentVolumeClaim>(&gw.nfs));
    assert!(!h.cluster.has::<Service>(&gw.nfs));
    assert!(!h.cluster.has::<Deployment>(&gw.nfs));
    assert!(!h.cluster.has::<PersistentVolume>(&gw.nfs_volume));
    assert!(!h.cluster.has::<PersistentVolumeClaim>(&gw.nfs_claim));
    assert!(!h.cluster.has::<Service>(&gw.name));
    assert!(!h.cluster.has::<Secret>(&gw.name));
    assert!(!h.cluster.has::<Deployment>(&gw.name));
    assert!(!h.cluster.has::<Ingress>(&gw.name));
}

#[tokio::test]
async fn instance_waits_for_its_certificate() {
    let h = Harness::new();
    let node = ready_node(&h, 1);
    let names = h.names(&node);

    let progress = h.reconciler.attach_gateways(&node).await.unwrap();
    assert!(matches!(progress, Progress::Waiting(reason) if reason.contains("certificate")));
    assert_instance_present(&h, &names, 0);
    assert_eq!(node_mount_paths(&h, &names), vec!["/sia", "/gateway1"]);
    assert_eq!(h.current(&node).gateways_activated, 0);

    h.cluster.issue_certificate(&names.gateway(0).cert);
    let progress = h
        .reconciler
        .attach_gateways(&h.current(&node))
        .await
        .unwrap();
    assert_eq!(progress, Progress::Gateways { activated: 1 });
    assert_eq!(h.current(&node).gateways_activated, 1);
}

#[tokio::test]
async fn nfs_volume_points_at_the_nfs_service() {
    let h = Harness::new();
    let node = ready_node(&h, 1);
    let gw = h.names(&node).gateway(0);

    h.reconciler.attach_gateways(&node).await.unwrap();

    let service = h.cluster.fetch::<Service>(&gw.nfs).unwrap();
    let volume = h.cluster.fetch::<PersistentVolume>(&gw.nfs_volume).unwrap();
    assert_eq!(
        volume.spec.unwrap().nfs.unwrap().server,
        specs::cluster_ip(&service).unwrap()
    );
}

#[tokio::test]
async fn nfs_service_without_address_defers_the_volume() {
    let h = Harness::new();
    h.cluster
        .assign_cluster_ips
        .store(false, std::sync::atomic::Ordering::SeqCst);
    let node = ready_node(&h, 1);
    let gw = h.names(&node).gateway(0);

    let progress = h.reconciler.attach_gateways(&node).await.unwrap();
    assert!(matches!(progress, Progress::Waiting(_)));
    assert!(h.cluster.has::<Service>(&gw.nfs));
    assert!(!h.cluster.has::<PersistentVolume>(&gw.nfs_volume));
}

#[tokio::test]
async fn credentials_are_generated_once_and_shared() {
    let h = Harness::new();
    let node = ready_node(&h, 2);
    let names = h.names(&node);
    h.cluster.issue_certificate(&names.gateway(0).cert);
    h.cluster.issue_certificate(&names.gateway(1).cert);

    let progress = h.reconciler.attach_gateways(&node).await.unwrap();
    assert_eq!(progress, Progress::Gateways { activated: 2 });

    let recorded = h.current(&node).gateway_credentials().unwrap();
    assert_eq!(recorded.access_key.len(), 20);
    assert_eq!(recorded.secret_key.len(), 40);
    for index in 0..2 {
        let secret = h.cluster.fetch::<Secret>(&names.gateway(index).name).unwrap();
        let data = secret.data.unwrap();
        assert_eq!(data["accesskey"].0, recorded.access_key.as_bytes());
        assert_eq!(data["secretkey"].0, recorded.secret_key.as_bytes());
    }
    assert_eq!(
        node_mount_paths(&h, &names),
        vec!["/sia", "/gateway1", "/gateway2"]
    );
}

#[tokio::test]
async fn activation_stops_at_the_first_pending_instance() {
    let h = Harness::new();
    let node = ready_node(&h, 3);
    let names = h.names(&node);
    h.cluster.issue_certificate(&names.gateway(0).cert);
    // Issued out of order; must not be counted before instance 1.
    h.cluster.issue_certificate(&names.gateway(2).cert);

    let progress = h.reconciler.attach_gateways(&node).await.unwrap();
    assert_eq!(progress, Progress::Gateways { activated: 1 });
    assert_eq!(h.current(&node).gateways_activated, 1);
    assert!(!h.cluster.has::<Ingress>(&names.gateway(2).name));
}

#[tokio::test]
async fn fully_attached_node_is_idle_and_untouched() {
    let h = Harness::new();
    let node = ready_node(&h, 1);
    let names = h.names(&node);
    h.cluster.issue_certificate(&names.gateway(0).cert);
    h.reconciler.attach_gateways(&node).await.unwrap();
    h.cluster.clear_ops();

    let progress = h
        .reconciler
        .attach_gateways(&h.current(&node))
        .await
        .unwrap();
    assert_eq!(progress, Progress::Idle);
    assert!(h.cluster.ops().is_empty());
}

#[tokio::test]
async fn lowered_request_tears_down_surplus_instances() {
    let h = Harness::new();
    let node = ready_node(&h, 2);
    let names = h.names(&node);
    h.cluster.issue_certificate(&names.gateway(0).cert);
    h.cluster.issue_certificate(&names.gateway(1).cert);
    h.reconciler.attach_gateways(&node).await.unwrap();

    h.store.set_gateways_requested(node.id, 1);
    let progress = h
        .reconciler
        .attach_gateways(&h.current(&node))
        .await
        .unwrap();
    assert_eq!(progress, Progress::Gateways { activated: 1 });
    assert_eq!(h.current(&node).gateways_activated, 1);
    assert_instance_present(&h, &names, 0);
    assert_instance_absent(&h, &names, 1);
    assert_eq!(node_mount_paths(&h, &names), vec!["/sia", "/gateway1"]);
}

#[tokio::test]
async fn node_that_is_not_ready_is_skipped() {
    let h = Harness::new();
    let node = h.add_node(NodeStatus::Configured, 1.0);
    h.store.set_gateways_requested(node.id, 1);

    let progress = h
        .reconciler
        .attach_gateways(&h.current(&node))
        .await
        .unwrap();
    assert!(matches!(progress, Progress::Waiting(_)));
    assert!(h.cluster.ops().is_empty());
}
