//! Desired state of every resource the reconciler creates.
//!
//! Builders are pure: names come from [`crate::naming`], everything else from
//! [`ClusterLayout`]. They are only consulted when a resource is absent.

use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy},
        core::v1::{
            Container, ContainerPort, EnvVar, EnvVarSource, NFSVolumeSource, PersistentVolume,
            PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource,
            PersistentVolumeSpec, PodSpec, PodTemplateSpec, Secret, SecretKeySelector,
            SecurityContext, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
            VolumeResourceRequirements,
        },
        networking::v1::{
            HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
            IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{LabelSelector, ObjectMeta},
        util::intstr::IntOrString,
    },
    ByteString,
};
use shared_types::GatewayCredentials;

use crate::config::ClusterLayout;
use crate::naming::{GatewayNames, NodeNames};

/// Port of the node's HTTP API inside its pod.
pub const NODE_API_PORT: i32 = 9980;
const NODE_PEER_PORT: i32 = 9981;
const NODE_HOST_PORT: i32 = 9982;
const GATEWAY_PORT: i32 = 9000;

/// Key of the wallet password inside a node's secret.
pub const WALLET_PASSWORD_KEY: &str = "siawalletpassword";
pub const ACCESS_KEY_KEY: &str = "accesskey";
pub const SECRET_KEY_KEY: &str = "secretkey";

const GATEWAY_CACHE_MAX_BYTES: &str = "90000000000";
const GATEWAY_CACHE_PURGE_AFTER_SECS: &str = "345600";

// ============================================================================
// Shared helpers
// ============================================================================

fn app_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), app.to_string())])
}

fn metadata(name: &str, layout: &ClusterLayout, labels: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(layout.namespace.clone()),
        labels: labels.map(app_labels),
        ..Default::default()
    }
}

fn storage(size: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([("storage".to_string(), Quantity(size.to_string()))])
}

fn claim(
    name: &str,
    layout: &ClusterLayout,
    storage_class: &str,
    size: &str,
    access_mode: &str,
    selector: Option<LabelSelector>,
) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: metadata(name, layout, None),
        spec: Some(PersistentVolumeClaimSpec {
            storage_class_name: Some(storage_class.to_string()),
            access_modes: Some(vec![access_mode.to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(storage(size)),
                ..Default::default()
            }),
            selector,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn port(name: &str, port: i32, protocol: &str) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        protocol: Some(protocol.to_string()),
        target_port: Some(IntOrString::Int(port)),
        ..Default::default()
    }
}

fn node_port_service(
    name: &str,
    app: &str,
    layout: &ClusterLayout,
    ports: Vec<ServicePort>,
) -> Service {
    Service {
        metadata: metadata(name, layout, Some(app)),
        spec: Some(ServiceSpec {
            type_: Some("NodePort".to_string()),
            selector: Some(app_labels(app)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn container_ports(ports: &[(&str, i32)]) -> Vec<ContainerPort> {
    ports
        .iter()
        .map(|(name, port)| ContainerPort {
            name: Some(name.to_string()),
            container_port: *port,
            ..Default::default()
        })
        .collect()
}

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn plain_env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn claim_volume(name: &str, claim: &str) -> Volume {
    Volume {
        name: name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim.to_string(),
            read_only: None,
        }),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

/// Single-replica deployment that recreates its pod on every change.
fn recreate_deployment(
    name: &str,
    app: &str,
    layout: &ClusterLayout,
    pod: PodSpec,
) -> Deployment {
    Deployment {
        metadata: metadata(name, layout, Some(app)),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(app_labels(app)),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(app_labels(app)),
                    ..Default::default()
                }),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn api_password_env(layout: &ClusterLayout) -> EnvVar {
    secret_env(
        "SIA_API_PASSWORD",
        &layout.api_secret_name,
        &layout.api_secret_key,
    )
}

// ============================================================================
// Storage node
// ============================================================================

pub fn node_volume_claim(names: &NodeNames, layout: &ClusterLayout) -> PersistentVolumeClaim {
    claim(
        names.base(),
        layout,
        &layout.node_storage_class,
        &layout.node_storage_size,
        "ReadWriteOnce",
        None,
    )
}

pub fn node_service(names: &NodeNames, layout: &ClusterLayout) -> Service {
    let mut ports = Vec::new();
    for (index, p) in [NODE_API_PORT, NODE_PEER_PORT, NODE_HOST_PORT]
        .into_iter()
        .enumerate()
    {
        ports.push(port(&format!("p{}", index * 2 + 1), p, "TCP"));
        ports.push(port(&format!("p{}", index * 2 + 2), p, "UDP"));
    }
    node_port_service(names.base(), names.app(), layout, ports)
}

/// The node's wallet password secret. Empty until a wallet seed exists.
pub fn node_secret(names: &NodeNames, layout: &ClusterLayout, password: &str) -> Secret {
    Secret {
        metadata: metadata(names.base(), layout, None),
        data: Some(BTreeMap::from([(
            WALLET_PASSWORD_KEY.to_string(),
            ByteString(password.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

pub fn node_deployment(names: &NodeNames, layout: &ClusterLayout) -> Deployment {
    let pod = PodSpec {
        volumes: Some(vec![claim_volume("node-volume", names.base())]),
        containers: vec![Container {
            name: "storage-node".to_string(),
            image: Some(layout.node_image.clone()),
            image_pull_policy: Some("Always".to_string()),
            ports: Some(container_ports(&[
                ("api", NODE_API_PORT),
                ("peer", NODE_PEER_PORT),
                ("host", NODE_HOST_PORT),
            ])),
            volume_mounts: Some(vec![mount("node-volume", "/sia")]),
            env: Some(vec![
                api_password_env(layout),
                secret_env("SIA_WALLET_PASSWORD", names.base(), WALLET_PASSWORD_KEY),
            ]),
            ..Default::default()
        }],
        ..Default::default()
    };
    recreate_deployment(names.base(), names.app(), layout, pod)
}

pub fn wallet_password(secret: &Secret) -> Option<&[u8]> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(WALLET_PASSWORD_KEY))
        .map(|bytes| bytes.0.as_slice())
}

pub fn with_wallet_password(secret: &Secret, password: &str) -> Secret {
    let mut updated = secret.clone();
    updated.data.get_or_insert_with(BTreeMap::new).insert(
        WALLET_PASSWORD_KEY.to_string(),
        ByteString(password.as_bytes().to_vec()),
    );
    updated
}

// ============================================================================
// Gateway NFS backing
// ============================================================================

pub fn nfs_backing_claim(gw: &GatewayNames, layout: &ClusterLayout) -> PersistentVolumeClaim {
    claim(
        &gw.nfs,
        layout,
        &layout.gateway_storage_class,
        &layout.gateway_storage_size,
        "ReadWriteOnce",
        None,
    )
}

pub fn nfs_service(gw: &GatewayNames, layout: &ClusterLayout) -> Service {
    node_port_service(
        &gw.nfs,
        &gw.nfs,
        layout,
        vec![
            port("nfs", 2049, "TCP"),
            port("mountd", 20048, "TCP"),
            port("rpcbind", 111, "TCP"),
        ],
    )
}

pub fn nfs_deployment(gw: &GatewayNames, layout: &ClusterLayout) -> Deployment {
    let pod = PodSpec {
        volumes: Some(vec![claim_volume("nfs", &gw.nfs)]),
        containers: vec![Container {
            name: "nfs-server".to_string(),
            image: Some(layout.nfs_image.clone()),
            ports: Some(container_ports(&[
                ("nfs", 2049),
                ("mountd", 20048),
                ("rpcbind", 111),
            ])),
            security_context: Some(SecurityContext {
                privileged: Some(true),
                ..Default::default()
            }),
            volume_mounts: Some(vec![mount("nfs", "/exports")]),
            ..Default::default()
        }],
        ..Default::default()
    };
    recreate_deployment(&gw.nfs, &gw.nfs, layout, pod)
}

/// Cluster-wide volume exported by the NFS server at `server`.
pub fn nfs_volume(gw: &GatewayNames, server: &str, layout: &ClusterLayout) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(gw.nfs_volume.clone()),
            labels: Some(app_labels(&gw.nfs_volume)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            capacity: Some(storage(&layout.gateway_storage_size)),
            access_modes: Some(vec!["ReadWriteMany".to_string()]),
            nfs: Some(NFSVolumeSource {
                server: server.to_string(),
                path: "/".to_string(),
                read_only: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Read-write-many claim pinned to the NFS volume by label.
pub fn gateway_claim(gw: &GatewayNames, layout: &ClusterLayout) -> PersistentVolumeClaim {
    claim(
        &gw.nfs_claim,
        layout,
        "",
        &layout.gateway_storage_size,
        "ReadWriteMany",
        Some(LabelSelector {
            match_labels: Some(app_labels(&gw.nfs_volume)),
            ..Default::default()
        }),
    )
}

// ============================================================================
// Gateway
// ============================================================================

pub fn gateway_service(gw: &GatewayNames, layout: &ClusterLayout) -> Service {
    node_port_service(
        &gw.name,
        &gw.name,
        layout,
        vec![port("gateway", GATEWAY_PORT, "TCP")],
    )
}

pub fn gateway_secret(
    gw: &GatewayNames,
    layout: &ClusterLayout,
    credentials: &GatewayCredentials,
) -> Secret {
    Secret {
        metadata: metadata(&gw.name, layout, None),
        data: Some(BTreeMap::from([
            (
                ACCESS_KEY_KEY.to_string(),
                ByteString(credentials.access_key.as_bytes().to_vec()),
            ),
            (
                SECRET_KEY_KEY.to_string(),
                ByteString(credentials.secret_key.as_bytes().to_vec()),
            ),
        ])),
        ..Default::default()
    }
}

pub fn gateway_deployment(
    gw: &GatewayNames,
    node: &NodeNames,
    layout: &ClusterLayout,
) -> Deployment {
    let daemon_addr = format!(
        "{}.{}.svc.cluster.local:{NODE_API_PORT}",
        node.base(),
        layout.namespace
    );
    let pod = PodSpec {
        volumes: Some(vec![claim_volume(&gw.nfs_claim, &gw.nfs_claim)]),
        containers: vec![Container {
            name: "gateway".to_string(),
            image: Some(layout.gateway_image.clone()),
            image_pull_policy: Some("Always".to_string()),
            ports: Some(container_ports(&[("gateway", GATEWAY_PORT)])),
            volume_mounts: Some(vec![mount(&gw.nfs_claim, &gw.mount_path)]),
            env: Some(vec![
                api_password_env(layout),
                secret_env("MINIO_ACCESS_KEY", &gw.name, ACCESS_KEY_KEY),
                secret_env("MINIO_SECRET_KEY", &gw.name, SECRET_KEY_KEY),
                plain_env("SIA_DAEMON_ADDR", daemon_addr),
                plain_env("SIA_CACHE_DIR", gw.cache_dir()),
                plain_env("SIA_DB_FILE", gw.db_file()),
                plain_env("SIA_CACHE_MAX_SIZE_BYTES", GATEWAY_CACHE_MAX_BYTES),
                plain_env("SIA_CACHE_PURGE_AFTER_SEC", GATEWAY_CACHE_PURGE_AFTER_SECS),
                plain_env("SIA_BACKGROUND_UPLOAD", "0"),
            ]),
            ..Default::default()
        }],
        ..Default::default()
    };
    recreate_deployment(&gw.name, &gw.name, layout, pod)
}

/// Public TLS ingress; the certificate lands in `gw.cert` once issued.
pub fn gateway_ingress(gw: &GatewayNames, layout: &ClusterLayout) -> Ingress {
    let host = gw.hostname(&layout.gateway_domain);
    let backend = IngressBackend {
        service: Some(IngressServiceBackend {
            name: gw.name.clone(),
            port: Some(ServiceBackendPort {
                number: Some(GATEWAY_PORT),
                ..Default::default()
            }),
        }),
        ..Default::default()
    };
    let annotations = BTreeMap::from(
        [
            ("kubernetes.io/tls-acme", "true"),
            ("kubernetes.io/ingress.class", "nginx"),
            ("ingress.kubernetes.io/force-ssl-redirect", "true"),
            ("ingress.kubernetes.io/proxy-body-size", "4g"),
        ]
        .map(|(k, v)| (k.to_string(), v.to_string())),
    );

    let mut meta = metadata(&gw.name, layout, Some(&gw.name));
    meta.annotations = Some(annotations);

    Ingress {
        metadata: meta,
        spec: Some(IngressSpec {
            default_backend: Some(backend.clone()),
            tls: Some(vec![IngressTLS {
                hosts: Some(vec![host.clone()]),
                secret_name: Some(gw.cert.clone()),
            }]),
            rules: Some(vec![IngressRule {
                host: Some(host),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend,
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// ============================================================================
// Observations
// ============================================================================

/// The service's assigned cluster IP, if it has a routable one yet.
pub fn cluster_ip(service: &Service) -> Option<String> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.cluster_ip.clone())
        .filter(|ip| !ip.is_empty() && ip != "None")
}

/// Whether a secret carries any data, as an issued certificate does.
pub fn has_data(secret: &Secret) -> bool {
    secret.data.as_ref().is_some_and(|data| !data.is_empty())
}
