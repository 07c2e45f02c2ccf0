//! The outer per-resource interval loop: tracks each resource's last
//! reconcile time and wakes it again once its own `reconcileInterval` has
//! elapsed. Runs continuously regardless of leadership; when not leader it
//! only updates metrics and sleeps, so a follower replica's readiness story
//! is driven purely by the lease loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use kube::api::ListParams;
use kube::{Api, Client};
use netctl_types::IPAllocation;
use tokio_util::sync::CancellationToken;

use netctl_common::logctx::LogContext;
use netctl_common::state::SharedState;

use crate::cloud::CloudBinding;
use crate::cluster::ClusterView;
use crate::evict::WorkloadEvictor;
use crate::labels::LabelPatcher;
use crate::reconcile;
use crate::util::{DEFAULT_RECONCILE_INTERVAL, SWEEP_INTERVAL};

/// Drives `reconcile::run` across every `IPAllocation` at its own
/// `reconcileInterval`, sleeping `SWEEP_INTERVAL` between sweeps, until
/// `shutdown` fires. Never returns an error: every failure inside a sweep is
/// logged and the loop continues.
pub async fn run(
    client: Client,
    cloud: Arc<dyn CloudBinding>,
    state: SharedState,
    identity: String,
    shutdown: CancellationToken,
) {
    let crds: Api<IPAllocation> = Api::all(client.clone());
    let cluster = ClusterView::new(client.clone());
    let labels = LabelPatcher::new(client.clone());
    let evictor = WorkloadEvictor::new(client.clone());
    let mut last_reconcile: HashMap<String, Instant> = HashMap::new();

    loop {
        let is_leader = state.lock().await.leader;
        if is_leader {
            sweep(
                &client,
                &crds,
                &cluster,
                cloud.as_ref(),
                &labels,
                &evictor,
                &mut last_reconcile,
                &identity,
                &state,
            )
            .await;
        } else {
            // Stale entries from a past leadership stint are meaningless
            // once we lose it; the next takeover should reconcile fresh.
            last_reconcile.clear();
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn sweep(
    client: &Client,
    crds: &Api<IPAllocation>,
    cluster: &ClusterView,
    cloud: &dyn CloudBinding,
    labels: &LabelPatcher,
    evictor: &WorkloadEvictor,
    last_reconcile: &mut HashMap<String, Instant>,
    identity: &str,
    state: &SharedState,
) {
    let ctx = LogContext::new(identity);

    let list = match crds.list(&ListParams::default()).await {
        Ok(list) => list.items,
        Err(e) => {
            ctx.error(&format!("failed to list IPAllocations: {e}"));
            return;
        }
    };

    let all_nodes = match cluster.list_all_nodes().await {
        Ok(nodes) => nodes,
        Err(e) => {
            ctx.error(&format!("failed to list cluster nodes: {e}"));
            return;
        }
    };

    let now = Instant::now();
    for instance in &list {
        let name = instance.metadata.name.clone().unwrap_or_default();
        let interval = if instance.spec.reconcile_interval > 0 {
            std::time::Duration::from_secs(instance.spec.reconcile_interval as u64)
        } else {
            DEFAULT_RECONCILE_INTERVAL
        };
        let due = last_reconcile
            .get(&name)
            .map(|last| now.duration_since(*last) >= interval)
            .unwrap_or(true);
        if !due {
            continue;
        }

        if let Err(e) = reconcile::run(
            client.clone(),
            instance,
            cluster,
            cloud,
            labels,
            evictor,
            &all_nodes,
            &ctx,
        )
        .await
        {
            ctx.with_crd(&name)
                .error(&format!("reconcile failed: {e}"));
        }
        last_reconcile.insert(name, Instant::now());
    }

    state.lock().await.last_reconcile_ok = Some(chrono::Utc::now());
}
