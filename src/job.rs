use std::collections::BTreeMap;

use clap::ValueEnum;
use k8s_openapi::{
    api::{
        batch::v1::{Job, JobSpec},
        core::v1::{
            Container, EnvVar, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
            SecretVolumeSource, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use tracing::info;

use crate::{
    app_err, cluster::ClusterApi, error::AppError, locate::SourcePod, sync, volume::BackupRequest,
};

pub const JOB_NAME_PREFIX: &str = "backup-job-";
const CONTAINER_NAME: &str = "main";
const DESTINATION_VOLUME: &str = "destination-volume";
const TOKEN_VOLUME: &str = "backup-service-account-token";
const TOKEN_MOUNT_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const MANAGED_BY: &str = "k8s-backup-scheduler";

/// What the job's container does once the destination claim is mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JobMode {
    /// Copy the source pod's volume into the destination claim.
    Sync,
    /// Sleep, leaving the destination claim mounted for manual work.
    Sleep,
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    pub image: String,
    /// Path of this tool inside `image`.
    pub binary: String,
    /// Where the destination claim is mounted in the job's pod.
    pub destination_dir: String,
    pub backoff_limit: i32,
    pub sleep_seconds: u32,
    pub service_account: String,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            image: "antonm/k8s-pv-backup-scheduler".to_string(),
            binary: "/usr/local/bin/k8s-backup-scheduler".to_string(),
            destination_dir: "/backup".to_string(),
            backoff_limit: 3,
            sleep_seconds: 9999,
            service_account: "backup-service-account".to_string(),
        }
    }
}

pub fn job_name(request: &BackupRequest) -> String {
    format!("{JOB_NAME_PREFIX}{}", request.destination.name)
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn container(
    mode: JobMode,
    source_pod: Option<&SourcePod>,
    mounts: Vec<VolumeMount>,
    settings: &JobSettings,
) -> Result<Container, AppError> {
    let mut container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(settings.image.clone()),
        volume_mounts: Some(mounts),
        ..Default::default()
    };

    match mode {
        JobMode::Sleep => {
            container.command = Some(vec!["/bin/bash".to_string()]);
            container.args = Some(vec![
                "-c".to_string(),
                format!("sleep {};", settings.sleep_seconds),
            ]);
        }
        JobMode::Sync => {
            let Some(pod) = source_pod else {
                return app_err!("Sync job needs a source pod");
            };
            container.command = Some(vec![settings.binary.clone()]);
            container.args = Some(vec!["sync".to_string()]);
            container.env = Some(vec![
                env(sync::SOURCE_POD_NAME_ENV, &pod.name),
                env(sync::SOURCE_POD_NAMESPACE_ENV, &pod.namespace),
                env(sync::SOURCE_POD_DIRECTORY_ENV, &pod.mount_path),
                env(sync::DESTINATION_DIRECTORY_ENV, &settings.destination_dir),
            ]);
        }
    }

    Ok(container)
}

/// Job that mounts the destination claim of `request` and either syncs
/// from `source_pod` or sleeps.
///
/// When a legacy token secret is given it is mounted in place of the
/// automatically projected service account token.
pub fn build_backup_job(
    request: &BackupRequest,
    mode: JobMode,
    source_pod: Option<&SourcePod>,
    token_secret: Option<&str>,
    settings: &JobSettings,
) -> Result<Job, AppError> {
    let mut mounts = vec![VolumeMount {
        name: DESTINATION_VOLUME.to_string(),
        mount_path: settings.destination_dir.clone(),
        ..Default::default()
    }];
    let mut volumes = vec![Volume {
        name: DESTINATION_VOLUME.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: request.destination.name.clone(),
            ..Default::default()
        }),
        ..Default::default()
    }];

    if let Some(secret) = token_secret {
        mounts.push(VolumeMount {
            name: TOKEN_VOLUME.to_string(),
            mount_path: TOKEN_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
        volumes.push(Volume {
            name: TOKEN_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    let name = job_name(request);
    let labels = BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
        ("job-name".to_string(), name.clone()),
    ]);

    Ok(Job {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(request.destination.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(settings.backoff_limit),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("OnFailure".to_string()),
                    service_account_name: Some(settings.service_account.clone()),
                    automount_service_account_token: token_secret.map(|_| false),
                    containers: vec![container(mode, source_pod, mounts, settings)?],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub async fn launch_job(api: &dyn ClusterApi, job: &Job) -> Result<Job, AppError> {
    let namespace = job.metadata.namespace.clone().unwrap_or_default();
    let created = api.create_job(&namespace, job).await?;
    info!(
        job = created.metadata.name.as_deref().unwrap_or_default(),
        namespace = %namespace,
        "Created Job"
    );
    Ok(created)
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::*;
    use crate::{cluster::MockClusterApi, volume::VolumeRef};

    fn request() -> BackupRequest {
        BackupRequest {
            source: VolumeRef::new("db-data", "apps"),
            destination: VolumeRef::new("db-data-copy", "backups"),
            overwrite: false,
        }
    }

    fn source_pod() -> SourcePod {
        SourcePod {
            name: "db-0".to_string(),
            namespace: "apps".to_string(),
            volume_name: "storage".to_string(),
            mount_path: "/var/lib/postgresql/data".to_string(),
        }
    }

    fn pod_spec(job: &Job) -> &PodSpec {
        job.spec.as_ref().unwrap().template.spec.as_ref().unwrap()
    }

    #[test]
    fn sync_job_passes_source_coordinates() {
        let pod = source_pod();
        let job = build_backup_job(
            &request(),
            JobMode::Sync,
            Some(&pod),
            None,
            &JobSettings::default(),
        )
        .unwrap();

        assert_eq!(job.metadata.name.as_deref(), Some("backup-job-db-data-copy"));
        assert_eq!(job.metadata.namespace.as_deref(), Some("backups"));
        assert_eq!(job.spec.as_ref().unwrap().backoff_limit, Some(3));

        let spec = pod_spec(&job);
        assert_eq!(spec.restart_policy.as_deref(), Some("OnFailure"));
        assert_eq!(
            spec.service_account_name.as_deref(),
            Some("backup-service-account")
        );
        assert_eq!(spec.automount_service_account_token, None);

        let container = &spec.containers[0];
        assert_eq!(container.name, "main");
        assert_eq!(container.args, Some(vec!["sync".to_string()]));

        let env: BTreeMap<_, _> = container
            .env
            .as_ref()
            .unwrap()
            .iter()
            .map(|e| (e.name.as_str(), e.value.as_deref().unwrap()))
            .collect();
        assert_eq!(env["SOURCE_POD_NAME"], "db-0");
        assert_eq!(env["SOURCE_POD_NAMESPACE"], "apps");
        assert_eq!(env["SOURCE_POD_DIRECTORY"], "/var/lib/postgresql/data");
        assert_eq!(env["DESTINATION_DIRECTORY"], "/backup");
    }

    #[test]
    fn destination_claim_is_mounted() {
        let job = build_backup_job(
            &request(),
            JobMode::Sleep,
            None,
            None,
            &JobSettings::default(),
        )
        .unwrap();
        let spec = pod_spec(&job);

        let volumes = spec.volumes.as_ref().unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(
            volumes[0].persistent_volume_claim.as_ref().unwrap().claim_name,
            "db-data-copy"
        );
        let mounts = spec.containers[0].volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].mount_path, "/backup");
    }

    #[test]
    fn sleep_job_runs_placeholder_command() {
        let job = build_backup_job(
            &request(),
            JobMode::Sleep,
            None,
            None,
            &JobSettings::default(),
        )
        .unwrap();
        let container = &pod_spec(&job).containers[0];
        assert_eq!(container.command, Some(vec!["/bin/bash".to_string()]));
        assert_eq!(
            container.args,
            Some(vec!["-c".to_string(), "sleep 9999;".to_string()])
        );
        assert!(container.env.is_none());
    }

    #[test]
    fn legacy_token_secret_replaces_automount() {
        let job = build_backup_job(
            &request(),
            JobMode::Sleep,
            None,
            Some("backup-service-account-token-x7k2p"),
            &JobSettings::default(),
        )
        .unwrap();
        let spec = pod_spec(&job);

        assert_eq!(spec.automount_service_account_token, Some(false));
        let token = &spec.volumes.as_ref().unwrap()[1];
        assert_eq!(
            token.secret.as_ref().unwrap().secret_name.as_deref(),
            Some("backup-service-account-token-x7k2p")
        );
        let mounts = spec.containers[0].volume_mounts.as_ref().unwrap();
        assert_eq!(
            mounts[1].mount_path,
            "/var/run/secrets/kubernetes.io/serviceaccount"
        );
    }

    #[test]
    fn sync_job_without_source_pod_is_rejected() {
        let err = build_backup_job(
            &request(),
            JobMode::Sync,
            None,
            None,
            &JobSettings::default(),
        )
        .unwrap_err();
        assert!(err.message.contains("source pod"));
    }

    #[tokio::test]
    async fn creation_errors_are_reported_verbatim() {
        let mut api = MockClusterApi::new();
        api.expect_create_job()
            .with(eq("backups"), mockall::predicate::always())
            .returning(|_, _| {
                Err(AppError::new(
                    "jobs.batch \"backup-job-db-data-copy\" already exists",
                ))
            });

        let job = build_backup_job(
            &request(),
            JobMode::Sleep,
            None,
            None,
            &JobSettings::default(),
        )
        .unwrap();
        let err = launch_job(&api, &job).await.unwrap_err();
        assert_eq!(
            err.message,
            "jobs.batch \"backup-job-db-data-copy\" already exists"
        );
    }
}
