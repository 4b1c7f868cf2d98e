use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;
use tracing::{debug, info};

use crate::{cluster::ClusterApi, error::AppError, volume::VolumeRef};

/// The pod that mounts the source claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePod {
    pub name: String,
    pub namespace: String,
    /// Name of the pod volume entry that references the claim.
    pub volume_name: String,
    /// Where that volume is mounted. Empty when no container mounts it.
    pub mount_path: String,
}

fn claim_volume<'a>(pod: &'a Pod, claim_name: &str) -> Option<&'a str> {
    pod.spec
        .as_ref()?
        .volumes
        .as_ref()?
        .iter()
        .find(|v| {
            v.persistent_volume_claim
                .as_ref()
                .is_some_and(|pvc| pvc.claim_name == claim_name)
        })
        .map(|v| v.name.as_str())
}

fn mount_path(pod: &Pod, volume_name: &str) -> Option<String> {
    pod.spec
        .as_ref()?
        .containers
        .iter()
        .flat_map(|c| c.volume_mounts.iter().flatten())
        .find(|m| m.name == volume_name)
        .map(|m| m.mount_path.clone())
}

/// First pod in `pods` with a volume backed by `claim_name`.
pub fn find_source_pod(pods: &[Pod], claim_name: &str) -> Option<SourcePod> {
    pods.iter().find_map(|pod| {
        let volume_name = claim_volume(pod, claim_name)?;
        let name = pod.metadata.name.clone()?;
        Some(SourcePod {
            name,
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            volume_name: volume_name.to_string(),
            mount_path: mount_path(pod, volume_name).unwrap_or_default(),
        })
    })
}

pub async fn locate_source_pod(
    api: &dyn ClusterApi,
    claim: &VolumeRef,
) -> Result<Option<SourcePod>, AppError> {
    let pods = api.list_pods(&claim.namespace).await?;
    debug!(namespace = %claim.namespace, pods = pods.len(), "Scanning pods for claim {}", claim.name);

    let found = find_source_pod(&pods, &claim.name).map(|mut pod| {
        if pod.namespace.is_empty() {
            pod.namespace = claim.namespace.clone();
        }
        pod
    });

    if let Some(pod) = &found {
        info!(pod = %pod.name, path = %pod.mount_path, "Found pod mounting {claim}");
    }
    Ok(found)
}
