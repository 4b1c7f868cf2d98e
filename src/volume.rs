use std::{fmt, time::Duration};

use k8s_openapi::{
    api::core::v1::{PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::{app_err, cluster::ClusterApi, error::AppError};

const BOUND_PHASE: &str = "Bound";

/// Identifies a persistent volume claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeRef {
    pub name: String,
    pub namespace: String,
}

impl VolumeRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for VolumeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub source: VolumeRef,
    pub destination: VolumeRef,
    /// Delete an existing destination claim (and all of its data) first.
    pub overwrite: bool,
}

/// Timings used while replacing and creating claims.
#[derive(Debug, Clone)]
pub struct ClaimTimings {
    /// Pause after creating the destination claim.
    pub settle: Duration,
    /// Interval between checks that a deleted claim is gone.
    pub deletion_poll: Duration,
    pub deletion_attempts: u32,
}

impl Default for ClaimTimings {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(3),
            deletion_poll: Duration::from_secs(1),
            deletion_attempts: 30,
        }
    }
}

fn is_bound(claim: &PersistentVolumeClaim) -> bool {
    claim
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == BOUND_PHASE)
}

/// Destination claim with the access modes, storage requests and storage
/// class of `source`.
pub fn build_destination_claim(
    source: &PersistentVolumeClaim,
    destination: &VolumeRef,
) -> PersistentVolumeClaim {
    let spec = source.spec.clone().unwrap_or_default();
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(destination.name.clone()),
            namespace: Some(destination.namespace.clone()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: spec.access_modes,
            resources: Some(VolumeResourceRequirements {
                requests: spec.resources.and_then(|r| r.requests),
                ..Default::default()
            }),
            storage_class_name: spec.storage_class_name,
            ..Default::default()
        }),
        ..Default::default()
    }
}

async fn delete_and_wait(
    api: &dyn ClusterApi,
    claim: &VolumeRef,
    timings: &ClaimTimings,
) -> Result<(), AppError> {
    api.delete_claim(&claim.namespace, &claim.name).await?;
    info!(claim = %claim, "Deleted existing destination claim");

    for _ in 0..timings.deletion_attempts {
        if api.get_claim(&claim.namespace, &claim.name).await?.is_none() {
            return Ok(());
        }
        debug!(claim = %claim, "Waiting for claim deletion...");
        sleep(timings.deletion_poll).await;
    }

    app_err!("Claim {claim} is still present after deletion")
}

/// Creates the destination claim of `request` shaped after its source.
///
/// Source and destination must differ. The source must exist and be bound.
/// With `overwrite` set, an existing destination claim is deleted first.
/// Without it, an existing destination makes the create call fail. Nothing
/// is rolled back if the create fails after a deletion.
#[tracing::instrument(skip_all, fields(source = %request.source, destination = %request.destination))]
pub async fn provision_destination_claim(
    api: &dyn ClusterApi,
    request: &BackupRequest,
    timings: &ClaimTimings,
) -> Result<PersistentVolumeClaim, AppError> {
    let source = &request.source;
    if *source == request.destination {
        return app_err!("Source and destination are both {source}");
    }

    let Some(source_claim) = api.get_claim(&source.namespace, &source.name).await? else {
        return app_err!("Source volume {source} not found");
    };

    if !is_bound(&source_claim) {
        return app_err!("Volume {} is not bound", source.name);
    }

    let destination = &request.destination;
    if request.overwrite
        && api
            .get_claim(&destination.namespace, &destination.name)
            .await?
            .is_some()
    {
        delete_and_wait(api, destination, timings).await?;
    }

    let claim = build_destination_claim(&source_claim, destination);
    let created = api.create_claim(&destination.namespace, &claim).await?;
    info!(claim = %destination, "Created destination claim");

    sleep(timings.settle).await;

    Ok(created)
}
