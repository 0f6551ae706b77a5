//! Pure edits of a deployment's claim-backed volumes.
//!
//! Both functions return the edited copy plus whether anything changed, so
//! callers only issue a replace when needed and a second call is a no-op.

use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{PersistentVolumeClaimVolumeSource, PodSpec, Volume, VolumeMount},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimMount {
    pub volume_name: String,
    pub claim_name: String,
    pub mount_path: String,
    pub read_only: bool,
}

fn pod_spec_mut(deployment: &mut Deployment) -> &mut PodSpec {
    deployment
        .spec
        .get_or_insert_with(Default::default)
        .template
        .spec
        .get_or_insert_with(Default::default)
}

/// Add the claim as a pod volume and mount it in every container.
pub fn with_claim_mounted(deployment: &Deployment, mount: &ClaimMount) -> (Deployment, bool) {
    let mut updated = deployment.clone();
    let pod = pod_spec_mut(&mut updated);
    let mut changed = false;

    let volumes = pod.volumes.get_or_insert_with(Vec::new);
    if !volumes.iter().any(|v| v.name == mount.volume_name) {
        volumes.push(Volume {
            name: mount.volume_name.clone(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: mount.claim_name.clone(),
                read_only: Some(mount.read_only),
            }),
            ..Default::default()
        });
        changed = true;
    }

    for container in &mut pod.containers {
        let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
        if !mounts.iter().any(|m| m.name == mount.volume_name) {
            mounts.push(VolumeMount {
                name: mount.volume_name.clone(),
                mount_path: mount.mount_path.clone(),
                read_only: Some(mount.read_only),
                ..Default::default()
            });
            changed = true;
        }
    }

    (updated, changed)
}

/// Remove the named volume and every container mount of it.
pub fn without_claim_mounted(deployment: &Deployment, volume_name: &str) -> (Deployment, bool) {
    let mut updated = deployment.clone();
    let mut changed = false;

    let Some(pod) = updated
        .spec
        .as_mut()
        .and_then(|spec| spec.template.spec.as_mut())
    else {
        return (updated, false);
    };

    if let Some(volumes) = pod.volumes.as_mut() {
        let before = volumes.len();
        volumes.retain(|v| v.name != volume_name);
        changed |= volumes.len() != before;
    }

    for container in &mut pod.containers {
        if let Some(mounts) = container.volume_mounts.as_mut() {
            let before = mounts.len();
            mounts.retain(|m| m.name != volume_name);
            changed |= mounts.len() != before;
        }
    }

    (updated, changed)
}
