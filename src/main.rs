//! Quorum operator - monitor cluster identity and credential bootstrap

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use kube::Client;
use tracing::{error, info};

use quorum_common::retry::{retry_with_backoff, RetryConfig};
use quorum_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use quorum_common::{DEFAULT_MSGR1_PORT, DEFAULT_MSGR2_PORT};
use quorum_mon::keyring::{AuthtoolKeyringGenerator, AUTHTOOL};
use quorum_mon::store::KubeStore;
use quorum_mon::{ClusterInfo, ClusterInfoResolver, Error, MonSpec, OwnerInfo, ResolverConfig};

/// Quorum - resolves the storage cluster's FSID and admin credential
#[derive(Parser, Debug)]
#[command(name = "quorum-operator", version, about, long_about = None)]
struct Cli {
    /// Log output format (json or text)
    #[arg(long, env = "QUORUM_LOG_FORMAT", default_value = "json", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load the cluster identity, creating it if none exists
    ///
    /// Creation requires the owner flags; without them a missing identity
    /// is reported as an error.
    Resolve {
        #[command(flatten)]
        common: CommonArgs,

        #[command(flatten)]
        owner: OwnerArgs,
    },

    /// Rewrite a legacy admin credential in the current record format
    Repair {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Namespace holding the cluster's records
    #[arg(long, short = 'n', env = "QUORUM_NAMESPACE")]
    namespace: String,

    /// Legacy messenger port recorded for new clusters
    #[arg(long, env = "QUORUM_MSGR1_PORT", default_value_t = DEFAULT_MSGR1_PORT)]
    msgr1_port: u16,

    /// msgr2 port recorded for new clusters
    #[arg(long, env = "QUORUM_MSGR2_PORT", default_value_t = DEFAULT_MSGR2_PORT)]
    msgr2_port: u16,

    /// Keyring tool binary
    #[arg(long, env = "QUORUM_AUTHTOOL", default_value = AUTHTOOL)]
    authtool: String,

    /// Directory for temporary keyrings (system temp dir if unset)
    #[arg(long, env = "QUORUM_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Bound on each store call and key generation
    #[arg(long, env = "QUORUM_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    /// Attempts before giving up on retryable errors (0 = forever)
    #[arg(long, env = "QUORUM_ATTEMPTS", default_value_t = 5)]
    attempts: u32,
}

#[derive(Args, Debug)]
struct OwnerArgs {
    /// API version of the owning resource
    #[arg(long, env = "QUORUM_OWNER_API_VERSION", default_value = "ceph.rook.io/v1")]
    owner_api_version: String,

    /// Kind of the owning resource
    #[arg(long, env = "QUORUM_OWNER_KIND", default_value = "CephCluster")]
    owner_kind: String,

    /// Name of the owning resource
    #[arg(long, env = "QUORUM_OWNER_NAME", requires = "owner_uid")]
    owner_name: Option<String>,

    /// UID of the owning resource
    #[arg(long, env = "QUORUM_OWNER_UID", requires = "owner_name")]
    owner_uid: Option<String>,
}

impl OwnerArgs {
    fn owner(&self) -> Option<OwnerInfo> {
        match (&self.owner_name, &self.owner_uid) {
            (Some(name), Some(uid)) => Some(OwnerInfo::controller(
                &self.owner_api_version,
                &self.owner_kind,
                name,
                uid,
            )),
            _ => None,
        }
    }
}

impl CommonArgs {
    fn mon_spec(&self) -> MonSpec {
        MonSpec {
            msgr1_port: self.msgr1_port,
            msgr2_port: self.msgr2_port,
        }
    }

    fn retry(&self) -> RetryConfig {
        RetryConfig::with_max_attempts(self.attempts)
    }

    async fn resolver(&self) -> anyhow::Result<ClusterInfoResolver> {
        let client = Client::try_default()
            .await
            .map_err(|e| anyhow::anyhow!("failed to create kubernetes client: {}", e))?;
        let store = Arc::new(KubeStore::new(client));

        let mut keyring = AuthtoolKeyringGenerator::new().with_program(&self.authtool);
        if let Some(dir) = &self.work_dir {
            keyring = keyring.with_work_dir(dir);
        }

        Ok(
            ClusterInfoResolver::new(store.clone(), store, Arc::new(keyring)).with_config(
                ResolverConfig {
                    timeout: Duration::from_secs(self.timeout_secs),
                },
            ),
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(&TelemetryConfig {
        format: cli.log_format,
        ..Default::default()
    })?;
    info!(version = env!("CARGO_PKG_VERSION"), "starting quorum-operator");

    match cli.command {
        Commands::Resolve { common, owner } => run_resolve(&common, &owner).await,
        Commands::Repair { common } => run_repair(&common).await,
    }
}

async fn run_resolve(common: &CommonArgs, owner: &OwnerArgs) -> anyhow::Result<()> {
    let resolver = common.resolver().await?;
    let mon_spec = common.mon_spec();
    let owner = owner.owner();

    let resolved = retry_with_backoff(
        &common.retry(),
        "resolve_cluster_info",
        Error::is_retryable,
        || resolver.resolve(&common.namespace, &mon_spec, owner.as_ref()),
    )
    .await
    .map_err(|e| report("resolve", e))?;

    print_summary(&resolved.info);
    println!("max-mon-id: {}", resolved.max_mon_id);
    for (name, endpoint) in &resolved.mapping.mons {
        println!("mon {}: {}", name, endpoint);
    }
    Ok(())
}

async fn run_repair(common: &CommonArgs) -> anyhow::Result<()> {
    let resolver = common.resolver().await?;
    let mon_spec = common.mon_spec();

    let info = retry_with_backoff(
        &common.retry(),
        "repair_cluster_info",
        Error::is_retryable,
        || resolver.repair(&common.namespace, &mon_spec),
    )
    .await
    .map_err(|e| report("repair", e))?;

    print_summary(&info);
    Ok(())
}

fn report(operation: &str, e: Error) -> Error {
    error!(
        operation,
        kind = e.kind(),
        scope = e.scope().unwrap_or("unknown"),
        retryable = e.is_retryable(),
        error = %e,
        "cluster info pass failed"
    );
    e
}

/// Print the non-secret parts of the resolved identity
fn print_summary(info: &ClusterInfo) {
    println!("namespace: {}", info.namespace);
    match &info.fsid {
        Some(fsid) => println!("fsid: {}", fsid),
        None => println!("fsid: <unknown>"),
    }
    println!("username: {}", info.admin.username);
    println!("source: {:?}", info.source);
    println!(
        "ports: msgr1={} msgr2={}",
        info.mon_ports.msgr1_port, info.mon_ports.msgr2_port
    );
}
