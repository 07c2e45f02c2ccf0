//! Process entry point: bootstraps the Kubernetes client and cloud
//! credentials, then spawns the lease task, the scheduler task, and the
//! health/metrics HTTP server as independent `tokio` tasks, all gated by a
//! shared `CancellationToken` for graceful shutdown.

mod args;
mod cloud;
mod cluster;
mod evict;
mod labels;
mod lease;
mod reconcile;
mod scheduler;
mod server;
mod util;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

use netctl_common::colors::FG2;

use args::Args;
use cloud::{CloudBinding, CredentialCache, GcpCloudBinding};
use lease::LeaderLease;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let namespace = args.resolve_namespace();
    let identity = args.resolve_identity();

    println!(
        "{}",
        format!(
            "netctl-operator {} starting: identity={identity} namespace={namespace}",
            args.controller_version
        )
        .color(FG2)
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to build Kubernetes client: {e}"))?;

    // A per-replica fallback project: the instance's own `cloud.project`
    // (read per-IPAllocation in the reconcile loop) always wins over this,
    // which only backs ambient-credential project resolution.
    let credentials = CredentialCache::from_env("")
        .map_err(|e| anyhow::anyhow!("failed to acquire cloud credentials: {e}"))?;
    let cloud_binding: Arc<dyn CloudBinding> = Arc::new(GcpCloudBinding::new(credentials));

    netctl_common::metrics::set_controller_info(&args.controller_version, &identity);
    reconcile::metrics::init();

    let lease_duration = Duration::from_secs(args.lease_duration_secs);
    let skew_grace = Duration::from_secs(args.lease_skew_grace_secs);
    let lease = LeaderLease::new(
        client.clone(),
        namespace,
        args.lease_name.clone(),
        identity.clone(),
        lease_duration,
        skew_grace,
    );

    let state = netctl_common::state::shared(lease_duration);
    let shutdown = CancellationToken::new();

    let lease_task = tokio::spawn(lease::run(
        lease,
        state.clone(),
        identity.clone(),
        shutdown.clone(),
    ));
    let scheduler_task = tokio::spawn({
        let client = client.clone();
        let cloud_binding = cloud_binding.clone();
        let state = state.clone();
        let identity = identity.clone();
        let shutdown = shutdown.clone();
        async move { scheduler::run(client, cloud_binding, state, identity, shutdown).await }
    });
    let server_task = tokio::spawn(server::run(state.clone(), args.metrics_port, shutdown.clone()));

    netctl_common::shutdown::shutdown_signal().await;
    println!("{}", "shutdown signal received, demoting and draining".color(FG2));
    shutdown.cancel();

    let _ = tokio::join!(lease_task, scheduler_task, server_task);
    println!("{}", "netctl-operator stopped".color(FG2));
    Ok(())
}
