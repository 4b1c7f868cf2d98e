use std::process::ExitStatus;

use clap::Args;
use tokio::process::Command;
use tracing::{debug, info};

use crate::{app_err, app_error, error::AppError};

pub const SOURCE_POD_NAME_ENV: &str = "SOURCE_POD_NAME";
pub const SOURCE_POD_NAMESPACE_ENV: &str = "SOURCE_POD_NAMESPACE";
pub const SOURCE_POD_DIRECTORY_ENV: &str = "SOURCE_POD_DIRECTORY";
pub const DESTINATION_DIRECTORY_ENV: &str = "DESTINATION_DIRECTORY";

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// The source pod name to sync the volume from
    #[arg(long = "sourcepodname", default_value = "pod-1")]
    pub source_pod_name: String,

    /// The source pod namespace
    #[arg(long = "sourcepodnamespace", default_value = "default")]
    pub source_pod_namespace: String,

    /// The source directory to sync the volume data from
    #[arg(long = "sourcepoddirectory", default_value = "/data")]
    pub source_pod_directory: String,

    /// The destination directory to sync the volume data to
    #[arg(long = "destinationpoddirectory", default_value = "/backup")]
    pub destination_directory: String,

    /// kubectl binary used for the copy
    #[arg(long, default_value = "/usr/local/bin/kubectl")]
    pub kubectl: String,

    /// Verify cluster connectivity before copying
    #[arg(long)]
    pub check_connection: bool,
}

impl SyncArgs {
    /// Replaces flag values with the matching environment variables that
    /// are set to something non-empty.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let fields = [
            (SOURCE_POD_NAME_ENV, &mut self.source_pod_name),
            (SOURCE_POD_NAMESPACE_ENV, &mut self.source_pod_namespace),
            (SOURCE_POD_DIRECTORY_ENV, &mut self.source_pod_directory),
            (DESTINATION_DIRECTORY_ENV, &mut self.destination_directory),
        ];
        for (var, field) in fields {
            if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
                debug!("{var} overrides {field:?}");
                *field = value;
            }
        }
    }

    /// Arguments of `kubectl cp <namespace>/<pod>:<path> <destination>`.
    pub fn kubectl_cp_args(&self) -> [String; 3] {
        [
            "cp".to_string(),
            format!(
                "{}/{}:{}",
                self.source_pod_namespace, self.source_pod_name, self.source_pod_directory
            ),
            self.destination_directory.clone(),
        ]
    }
}

/// Copies the source pod directory into the local destination directory.
/// kubectl's exit status is the only success signal.
#[tracing::instrument(skip_all, fields(pod = %args.source_pod_name, namespace = %args.source_pod_namespace))]
pub async fn run_sync(args: &SyncArgs) -> Result<ExitStatus, AppError> {
    let cp_args = args.kubectl_cp_args();
    info!("Running {} {}", args.kubectl, cp_args.join(" "));

    let status = Command::new(&args.kubectl)
        .args(&cp_args)
        .status()
        .await
        .map_err(|e| app_error!("Can't run {}: {e}", args.kubectl))?;

    if !status.success() {
        return app_err!("kubectl cp failed: {status}");
    }

    info!("Copied {} to {}", cp_args[1], args.destination_directory);
    Ok(status)
}
