//! Cluster curator - runs one curation step for one cluster

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::CustomResourceExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use curator::client::create_client;
use curator::config::{
    timeout_from_secs, CuratorConfig, DEFAULT_CLUSTER_TIMEOUT, DEFAULT_IMPORT_TIMEOUT,
    DEFAULT_JOB_TIMEOUT,
};
use curator::crd::ClusterCurator;
use curator::dispatcher::{Command, Context, Dispatcher};
use curator::poll::PollConfig;
use curator::retry::RetryConfig;

/// Curator - runs automation hooks around cluster install, upgrade and destroy
#[derive(Parser, Debug)]
#[command(name = "curator", version, about, long_about = None)]
struct Cli {
    /// Generate the ClusterCurator CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Operation to run (install, upgrade-cluster, destroy-cluster, monitor,
    /// monitor-import, monitor-destroy, activate-and-monitor, monitor-upgrade,
    /// done, ansiblejob, applycloudprovider-ansible)
    operation: Option<String>,

    /// Name of the cluster (and of its ClusterCurator)
    #[arg(env = "CLUSTER_NAME")]
    cluster_name: Option<String>,

    /// Namespace of the ClusterCurator; defaults to the cluster name
    #[arg(long, env = "CLUSTER_NAMESPACE")]
    namespace: Option<String>,

    /// Path to a kubeconfig; in-cluster or default config when unset
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Hook phase for the ansiblejob operation (prehook or posthook)
    #[arg(long, env = "JOB_TYPE")]
    job_type: Option<String>,

    /// Provider credential secret as namespace/secretName
    #[arg(long, env = "PROVIDER_CREDENTIAL_PATH")]
    provider_credential_path: Option<String>,

    /// Name of the Kubernetes Job running this process
    #[arg(long, env = "CURATOR_JOB_NAME")]
    curator_job_name: Option<String>,

    /// Seconds between automation job polls
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u64).range(1..))]
    job_poll_secs: u64,

    /// Seconds between import polls
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..))]
    import_poll_secs: u64,

    /// Seconds between provisioning, teardown and upgrade polls
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..))]
    cluster_poll_secs: u64,

    /// Deadline for one automation job in seconds (0 waits forever)
    #[arg(long, default_value_t = DEFAULT_JOB_TIMEOUT.as_secs())]
    job_timeout_secs: u64,

    /// Deadline for import in seconds (0 waits forever)
    #[arg(long, default_value_t = DEFAULT_IMPORT_TIMEOUT.as_secs())]
    import_timeout_secs: u64,

    /// Deadline for provisioning, teardown and upgrade in seconds (0 waits forever)
    #[arg(long, default_value_t = DEFAULT_CLUSTER_TIMEOUT.as_secs())]
    cluster_timeout_secs: u64,

    /// Attempts for a ClusterCurator write that hits a conflict
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u32).range(1..))]
    conflict_retries: u32,
}

impl Cli {
    fn curator_config(&self) -> CuratorConfig {
        CuratorConfig {
            job_poll: PollConfig::new(
                Duration::from_secs(self.job_poll_secs),
                timeout_from_secs(self.job_timeout_secs),
            ),
            import_poll: PollConfig::new(
                Duration::from_secs(self.import_poll_secs),
                timeout_from_secs(self.import_timeout_secs),
            ),
            cluster_poll: PollConfig::new(
                Duration::from_secs(self.cluster_poll_secs),
                timeout_from_secs(self.cluster_timeout_secs),
            ),
            retry: RetryConfig::with_max_attempts(self.conflict_retries),
            job_type: self.job_type.clone(),
            provider_credential_path: self.provider_credential_path.clone(),
            curator_job_name: self.curator_job_name.clone().filter(|n| !n.is_empty()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider before any TLS connection is made
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&ClusterCurator::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    // The keyword is checked before any cluster access
    let command: Command = cli.operation.as_deref().unwrap_or_default().parse()?;
    let cluster_name = cli
        .cluster_name
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Missing cluster name"))?;
    let namespace = cli
        .namespace
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| cluster_name.clone());
    let config = cli.curator_config();

    let client = create_client(cli.kubeconfig.as_deref()).await?;
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone())?;

    let ctx = Context::builder(client).config(config).cancel(cancel).build();
    let dispatcher = Dispatcher::new(Arc::new(ctx));

    match dispatcher.run(command, &namespace, &cluster_name).await {
        Ok(()) => {
            info!(command = %command, cluster = %cluster_name, "done");
            Ok(())
        }
        Err(e) => {
            error!(command = %command, cluster = %cluster_name, error = %e, "curation halted");
            Err(e.into())
        }
    }
}

/// Fire `cancel` on SIGINT or SIGTERM so every wait ends promptly
fn spawn_signal_handler(cancel: CancellationToken) -> anyhow::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
        cancel.cancel();
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_poll_interval_is_rejected() {
        for flag in ["--job-poll-secs", "--import-poll-secs", "--cluster-poll-secs"] {
            let parsed = Cli::try_parse_from(["curator", "install", "my-cluster", flag, "0"]);
            assert!(parsed.is_err(), "{flag} 0 should be rejected");
        }
    }

    #[test]
    fn zero_timeout_means_unbounded() {
        let cli = Cli::try_parse_from(["curator", "install", "my-cluster", "--job-timeout-secs", "0"])
            .unwrap();
        assert_eq!(cli.curator_config().job_poll.timeout, None);
    }

    #[test]
    fn unknown_job_type_does_not_block_other_operations() {
        let cli = Cli::try_parse_from(["curator", "install", "my-cluster", "--job-type", "foo"])
            .unwrap();
        let config = cli.curator_config();
        assert_eq!(config.job_type.as_deref(), Some("foo"));
        assert!(config.require_job_type().is_err());
    }
}
