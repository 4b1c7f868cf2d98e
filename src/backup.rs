use std::time::Duration;

use clap::Args;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    access::{self, AccessReport},
    app_err,
    cluster::ClusterApi,
    config::Settings,
    error::AppError,
    job::{self, JobMode},
    locate::{self, SourcePod},
    volume::{self, BackupRequest, VolumeRef},
};

#[derive(Args, Debug, Clone)]
pub struct BackupArgs {
    /// The source persistent volume claim name
    #[arg(long = "sourcevolumename", default_value = "pvc-1")]
    pub source_volume_name: String,

    /// The source persistent volume claim namespace
    #[arg(long = "sourcevolumenamespace", default_value = "default")]
    pub source_volume_namespace: String,

    /// The destination persistent volume claim name
    #[arg(long = "destinationvolumename", default_value = "pvc-2")]
    pub destination_volume_name: String,

    /// The destination persistent volume claim namespace
    #[arg(long = "destinationvolumenamespace", default_value = "default")]
    pub destination_volume_namespace: String,

    /// Override and delete existing destination volume (WARNING: THIS WILL DELETE ALL DATA IN DESTINATION VOLUME)
    #[arg(long = "override")]
    pub r#override: bool,

    /// What the backup job does after mounting the destination volume
    #[arg(long, value_enum, default_value_t = JobMode::Sync)]
    pub mode: JobMode,

    /// Container image of the backup job
    #[arg(long, env = "BACKUP_JOB_IMAGE")]
    pub image: Option<String>,

    /// Seconds to wait after creating the destination claim
    #[arg(long, default_value_t = 3)]
    pub settle_seconds: u64,
}

impl BackupArgs {
    pub fn request(&self) -> BackupRequest {
        BackupRequest {
            source: VolumeRef::new(&self.source_volume_name, &self.source_volume_namespace),
            destination: VolumeRef::new(
                &self.destination_volume_name,
                &self.destination_volume_namespace,
            ),
            overwrite: self.r#override,
        }
    }

    pub fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        if let Some(image) = &self.image {
            settings.job.image = image.clone();
        }
        settings.timings.settle = Duration::from_secs(self.settle_seconds);
        settings
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupReport {
    pub source: VolumeRef,
    pub destination: VolumeRef,
    pub access: AccessReport,
    pub source_pod: Option<SourcePod>,
    pub token_secret: Option<String>,
    pub job: String,
}

/// Provisions the destination claim, the backup identity and the job that
/// fills the claim.
///
/// In sync mode the source pod is looked up before anything is written, so
/// a missing pod leaves the cluster untouched.
#[tracing::instrument(skip_all, fields(source = %request.source, destination = %request.destination, ?mode))]
pub async fn run_backup(
    api: &dyn ClusterApi,
    request: &BackupRequest,
    mode: JobMode,
    settings: &Settings,
) -> Result<BackupReport, AppError> {
    let source_pod = match mode {
        JobMode::Sync => match locate::locate_source_pod(api, &request.source).await? {
            Some(pod) => Some(pod),
            None => {
                return app_err!(
                    "No pod in {} mounts {}",
                    request.source.namespace,
                    request.source.name
                );
            }
        },
        JobMode::Sleep => None,
    };

    if let Some(pod) = source_pod.as_ref().filter(|p| p.mount_path.is_empty()) {
        warn!(
            pod = %pod.name,
            volume = %pod.volume_name,
            "Source volume is not mounted by any container"
        );
    }

    volume::provision_destination_claim(api, request, &settings.timings).await?;

    let namespace = &request.destination.namespace;
    let access = access::ensure_access_bundle(api, &settings.access, namespace).await?;
    let token_secret = access::find_token_secret(api, &settings.access, namespace).await?;

    let job = job::build_backup_job(
        request,
        mode,
        source_pod.as_ref(),
        token_secret.as_deref(),
        &settings.job,
    )?;
    job::launch_job(api, &job).await?;

    let report = BackupReport {
        source: request.source.clone(),
        destination: request.destination.clone(),
        access,
        source_pod,
        token_secret,
        job: job::job_name(request),
    };
    info!(job = %report.job, "Backup job submitted");
    Ok(report)
}
