//! Bucket operator - provisions object-storage buckets and access credentials

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::{Api, Client, CustomResourceExt};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bucket_operator::config::ControllerConfig;
use bucket_operator::controller::{Context, Runner};
use bucket_operator::crd::{BucketAccess, BucketClaim, BucketClass};
use bucket_operator::driver::{DriverEndpoint, DriverRegistry};
use bucket_operator::informer;
use bucket_operator::leader_election::{LeaderElector, LeaseTimings, LEADER_LEASE_NAME};
use bucket_operator::retry::RetryConfig;
use bucket_operator::DEFAULT_LEADER_ELECTION_NAMESPACE;

/// Bucket operator - CRD-driven provisioning of object-storage buckets
#[derive(Parser, Debug)]
#[command(name = "bucket-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Worker tasks per resource kind
    #[arg(long, env = "WORKER_THREADS", default_value_t = 4)]
    worker_threads: usize,

    /// Seconds between full re-enqueues of every cached object (0 disables)
    #[arg(long, env = "RESYNC_PERIOD_SECS", default_value_t = 900)]
    resync_period_secs: u64,

    /// First retry delay after a failed reconcile, in milliseconds
    #[arg(long, env = "RETRY_INTERVAL_START_MS", default_value_t = 1000)]
    retry_interval_start_ms: u64,

    /// Upper bound on the retry delay, in seconds
    #[arg(long, env = "RETRY_INTERVAL_MAX_SECS", default_value_t = 300)]
    retry_interval_max_secs: u64,

    /// Backend types served by the built-in in-memory driver
    #[arg(long, env = "FAKE_DRIVERS", value_delimiter = ',', default_value = "fake")]
    fake_drivers: Vec<String>,

    /// Out-of-process drivers as backend-type=endpoint pairs
    #[arg(long, env = "BUCKET_DRIVERS", value_delimiter = ',')]
    bucket_drivers: Vec<DriverEndpoint>,

    /// Per-call timeout for gRPC drivers, in seconds
    #[arg(long, env = "DRIVER_TIMEOUT_SECS", default_value_t = 30)]
    driver_timeout_secs: u64,

    /// Only reconcile while holding the leader Lease
    #[arg(long, env = "ENABLE_LEADER_ELECTION", default_value_t = false)]
    enable_leader_election: bool,

    /// Namespace of the leader Lease
    #[arg(long, env = "LEADER_ELECTION_NAMESPACE", default_value = DEFAULT_LEADER_ELECTION_NAMESPACE)]
    leader_election_namespace: String,

    /// Identity of this instance, normally the pod name
    #[arg(long, env = "POD_NAME")]
    pod_name: Option<String>,

    /// Seconds a lease stays valid without renewal
    #[arg(long, env = "LEASE_DURATION_SECS", default_value_t = 30)]
    lease_duration_secs: u64,

    /// Seconds between lease renewals
    #[arg(long, env = "LEASE_RENEW_INTERVAL_SECS", default_value_t = 10)]
    lease_renew_interval_secs: u64,

    /// Seconds between acquisition attempts while not leading
    #[arg(long, env = "LEASE_RETRY_PERIOD_SECS", default_value_t = 5)]
    lease_retry_period_secs: u64,
}

impl Cli {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            workers: self.worker_threads,
            resync_period: Duration::from_secs(self.resync_period_secs),
            retry: RetryConfig::new(
                Duration::from_millis(self.retry_interval_start_ms),
                Duration::from_secs(self.retry_interval_max_secs),
            ),
        }
    }

    fn lease_timings(&self) -> LeaseTimings {
        LeaseTimings {
            lease_duration: Duration::from_secs(self.lease_duration_secs),
            renew_interval: Duration::from_secs(self.lease_renew_interval_secs),
            retry_period: Duration::from_secs(self.lease_retry_period_secs),
        }
    }

    fn identity(&self) -> String {
        self.pod_name
            .clone()
            .unwrap_or_else(|| format!("bucket-operator-{}", uuid::Uuid::new_v4()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if cli.crd {
        for crd in [BucketClass::crd(), BucketClaim::crd(), BucketAccess::crd()] {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    let config = cli.controller_config();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let drivers = DriverRegistry::from_config(
        &cli.fake_drivers,
        &cli.bucket_drivers,
        Duration::from_secs(cli.driver_timeout_secs),
    )
    .map_err(|e| anyhow::anyhow!("Invalid driver configuration: {}", e))?;
    if drivers.is_empty() {
        anyhow::bail!("No bucket drivers configured; set FAKE_DRIVERS or BUCKET_DRIVERS");
    }
    info!(backends = ?drivers.backend_types(), "Bucket drivers registered");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    let identity = cli.identity();
    let ctx = Arc::new(
        Context::builder(client.clone())
            .drivers(drivers)
            .reporter_instance(identity.clone())
            .build(),
    );

    if !cli.enable_leader_election {
        run_controllers(client, ctx, config, shutdown_signal()).await;
        return Ok(());
    }

    let elector = Arc::new(LeaderElector::new(
        client.clone(),
        LEADER_LEASE_NAME,
        &cli.leader_election_namespace,
        &identity,
        cli.lease_timings(),
    ));
    let mut guard = tokio::select! {
        guard = Arc::clone(&elector).acquire() => guard,
        _ = shutdown_signal() => {
            info!("Shutdown requested before leadership was acquired");
            return Ok(());
        }
    };

    let (lost_tx, mut lost_rx) = tokio::sync::oneshot::channel::<()>();
    let stop = async {
        tokio::select! {
            _ = guard.lost() => {
                let _ = lost_tx.send(());
            }
            _ = shutdown_signal() => {}
        }
    };
    run_controllers(client, ctx, config, stop).await;

    if lost_rx.try_recv().is_ok() {
        error!("Leadership lost, exiting so a standby can take over");
        anyhow::bail!("leadership lost");
    }
    if let Err(e) = guard.release().await {
        warn!(error = %e, "Failed to release leader lease");
    }
    Ok(())
}

/// Watch claims and accesses and reconcile them until `shutdown` resolves
async fn run_controllers(
    client: Client,
    ctx: Arc<Context>,
    config: ControllerConfig,
    shutdown: impl Future<Output = ()>,
) {
    let runner = Runner::new(ctx, config);

    let claims: Api<BucketClaim> = Api::all(client.clone());
    let accesses: Api<BucketAccess> = Api::all(client);
    let watchers = [
        tokio::spawn(informer::run(claims, runner.claim_router())),
        tokio::spawn(informer::run(accesses, runner.access_router())),
    ];

    info!("Starting bucket controllers");
    runner.run(shutdown).await;

    for watcher in watchers {
        watcher.abort();
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received");
}

/// Ensure all bucket CRDs are installed
///
/// The operator installs its own CRDs on startup using server-side apply.
/// This ensures the CRD versions always match the operator version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply("bucket-operator").force();

    for crd in [BucketClass::crd(), BucketClaim::crd(), BucketAccess::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        info!(crd = %name, "Installing CRD...");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }

    Ok(())
}
