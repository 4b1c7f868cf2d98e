use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use backup::{BackupArgs, run_backup};
use clap::{Parser, Subcommand};
use cluster::{ClusterApi, ClusterConfig, KubeClusterApi, check_connection};
use sync::{SyncArgs, run_sync};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod access;
mod backup;
mod cluster;
mod config;
mod error;
mod job;
mod locate;
mod sync;
#[cfg(test)]
mod testing;
mod volume;

/// Simple Kubernetes Persistent Volume Backup with Scheduling
#[derive(Parser, Debug)]
#[command(name = "k8s-backup-scheduler", version, about)]
struct Cli {
    /// Path to the kubeconfig file [default: ~/.kube/config]
    #[arg(long, global = true, env = "BACKUP_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Should be verbose
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prints current time
    Now,
    /// Test K8s Cluster Config Connection
    #[command(name = "k8s-test")]
    K8sTest,
    /// Back up a persistent volume to a destination volume
    Backup(BackupArgs),
    /// Synchronize a persistent volume to a destination folder
    Sync(SyncArgs),
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn connection_verdict(good: bool, kubeconfig: &Path) -> String {
    if good {
        "K8s Cluster Config Connection is GOOD! You're ready to use the backup!".to_string()
    } else {
        format!(
            "K8s Cluster Config Connection is BAD! Please check config at {}",
            kubeconfig.display()
        )
    }
}

/// Fails unless the connection check sees at least one pod.
async fn require_connection(api: &dyn ClusterApi) -> anyhow::Result<()> {
    if !check_connection(api)
        .await
        .context("Cluster connection check failed")?
    {
        bail!("Cluster connection check failed: no pods visible");
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cluster_config = ClusterConfig {
        kubeconfig: cli.kubeconfig,
    };

    match cli.command {
        Command::Now => {
            println!("now: {}", chrono::Local::now());
        }
        Command::K8sTest => {
            let path = cluster_config.kubeconfig_path()?;
            let client = cluster::connect(&cluster_config)
                .await
                .context("Can't connect to Kubernetes API")?;
            let good = check_connection(&KubeClusterApi::new(client)).await?;
            println!("{}", connection_verdict(good, &path));
        }
        Command::Backup(args) => {
            let client = cluster::connect(&cluster_config)
                .await
                .context("Can't connect to Kubernetes API")?;
            info!("Connected to Kubernetes API...");

            let api = KubeClusterApi::new(client);
            let report = run_backup(&api, &args.request(), args.mode, &args.settings()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Sync(mut args) => {
            args.apply_env_overrides(|var| std::env::var(var).ok());
            debug!("Sync arguments: {args:?}");

            if args.check_connection {
                let client = cluster::connect_inferred().await?;
                require_connection(&KubeClusterApi::new(client)).await?;
            }

            run_sync(&args).await?;
        }
    }

    Ok(())
}
