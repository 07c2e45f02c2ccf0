//! Async orchestration of one `IPAllocation`'s convergence: fetch the
//! candidate node pool, decide and execute the attach/detach/label actions
//! for each reserved IP, sweep for stale labels, then patch status.

pub mod metrics;
pub mod plan;

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::time::Instant;

use k8s_openapi::api::core::v1::Node;
use kube::Client;
use netctl_types::{IPAllocation, IpAssignment};

use netctl_common::logctx::LogContext;

use crate::cloud::{CloudBinding, NodeRef};
use crate::cluster::{self, ClusterView};
use crate::evict::WorkloadEvictor;
use crate::labels::LabelPatcher;
use crate::util::patch::patch_status;

use plan::{IpAction, NodeFact};

/// Runs the full convergence algorithm for `instance` and persists its
/// status subresource. `all_nodes` is the whole-cluster node listing,
/// fetched once per sweep by the caller and reused here for step 5.
pub async fn run(
    client: Client,
    instance: &IPAllocation,
    cluster: &ClusterView,
    cloud: &dyn CloudBinding,
    labels: &LabelPatcher,
    evictor: &WorkloadEvictor,
    all_nodes: &[Node],
    ctx: &LogContext,
) -> Result<(), crate::util::Error> {
    let name = instance.metadata.name.clone().unwrap_or_default();
    let ctx = ctx.with_crd(&name);
    ctx.info("reconciling CRD");

    let start = Instant::now();
    let spec = &instance.spec;
    let reserved_ips: Vec<Ipv4Addr> = spec
        .reserved_ips
        .iter()
        .filter_map(|raw| match raw.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                ctx.warn(&format!("ignoring non-IPv4 reservedIPs entry {raw:?}"));
                None
            }
        })
        .collect();
    metrics::RESERVED_IPS
        .with_label_values(&[&name])
        .set(reserved_ips.len() as f64);

    let pool = match cluster.list_nodes(&spec.node_selector).await {
        Ok(nodes) => nodes,
        Err(e) => {
            ctx.error(&format!("failed to list nodes: {e}"));
            metrics::RECONCILE_TOTAL.with_label_values(&[&name, "error"]).inc();
            metrics::CRD_STATUS.with_label_values(&[&name]).set(0.0);
            return Err(e);
        }
    };

    for node in &pool {
        let node_name = node.metadata.name.as_deref().unwrap_or_default();
        metrics::NODE_CORDONED
            .with_label_values(&[node_name])
            .set(if cluster::schedulable(node) { 0.0 } else { 1.0 });
    }

    let mut assignments = Vec::new();
    let mut free: HashSet<String> = pool
        .iter()
        .filter_map(|n| n.metadata.name.clone())
        .collect();
    let mut attached_count = 0u32;
    let mut unattached_count = 0u32;
    let mut any_failure = false;

    for ip in &reserved_ips {
        let ip_ctx = ctx.with_ip(ip.to_string());
        let project = spec.cloud.project.clone();

        let mut holder: Option<&Node> = None;
        for node in &pool {
            let node_ref = node_ref(&project, node);
            if cloud.has_ip(&node_ref, *ip).await {
                holder = Some(node);
                break;
            }
        }

        let action = match holder {
            Some(node) => {
                let node_name = node.metadata.name.clone().unwrap_or_default();
                let pods = match cluster.pods_on_node(&node_name).await {
                    Ok(pods) => pods,
                    Err(e) => {
                        ip_ctx.error(&format!("failed to list pods on {node_name}: {e}"));
                        any_failure = true;
                        continue;
                    }
                };
                let drained = cluster::is_drained(
                    node,
                    &pods,
                    spec.workload_ref.as_ref(),
                    "app",
                );
                let workload_pods_present = spec
                    .workload_ref
                    .as_ref()
                    .is_some_and(|wl| cluster::has_workload_pods(&pods, wl));
                let fact = NodeFact {
                    name: node_name.clone(),
                    schedulable: cluster::schedulable(node),
                    ready: cluster::ready(node),
                    has_ip_ready_label: has_ready_label(node),
                    drained,
                    workload_pods_present,
                };
                let reattach = cluster::find_healthy_node(&pool, &spec.node_selector, Some(node_name.as_str()))
                    .and_then(|n| n.metadata.name.as_deref());
                plan::decide_ip_action(Some(&fact), None, reattach)
            }
            None => {
                let free_fact = pool
                    .iter()
                    .find(|n| {
                        free.contains(n.metadata.name.as_deref().unwrap_or_default())
                            && cluster::schedulable(n)
                    })
                    .map(|n| NodeFact {
                        name: n.metadata.name.clone().unwrap_or_default(),
                        schedulable: true,
                        ready: cluster::ready(n),
                        has_ip_ready_label: has_ready_label(n),
                        drained: false,
                        workload_pods_present: false,
                    });
                plan::decide_ip_action(None, free_fact.as_ref(), None)
            }
        };

        match action {
            IpAction::EnsureLabel { node } => {
                free.remove(&node);
                if let Err(e) = labels.mark_ready(&node, &ip_ctx).await {
                    ip_ctx.error(&format!("failed to set ip.ready on {node}: {e}"));
                    any_failure = true;
                }
                assignments.push(IpAssignment { ip: ip.to_string(), node: node.clone() });
                attached_count += 1;
                metrics::IP_ATTACHED
                    .with_label_values(&[&name, &ip.to_string(), &node])
                    .set(1.0);
                metrics::NODE_IP_READY
                    .with_label_values(&[&name, &node])
                    .set(1.0);
            }
            IpAction::Detach { from, reattach_to } => {
                let from_ref = pool
                    .iter()
                    .find(|n| n.metadata.name.as_deref() == Some(from.as_str()))
                    .map(|n| node_ref(&project, n));
                if let Some(from_ref) = from_ref {
                    match cloud.detach(&from_ref, *ip).await {
                        Ok(()) => {
                            metrics::IP_DETACH_TOTAL.with_label_values(&[&name, "success"]).inc();
                            metrics::IP_ATTACHED.with_label_values(&[&name, &ip.to_string(), &from]).set(0.0);
                            metrics::NODE_IP_READY.with_label_values(&[&name, &from]).set(0.0);
                        }
                        Err(e) => {
                            ip_ctx.error(&format!("failed to detach from {from}: {e}"));
                            metrics::IP_DETACH_TOTAL.with_label_values(&[&name, "error"]).inc();
                            metrics::GCP_API_ERRORS_TOTAL
                                .with_label_values(&["detach", "api_error"])
                                .inc();
                            any_failure = true;
                        }
                    }
                }
                if let Err(e) = labels.clear_ready(&from, &ip_ctx).await {
                    ip_ctx.error(&format!("failed to clear ip.ready on {from}: {e}"));
                }
                let mut reattached = false;
                if let Some(target) = reattach_to {
                    if let Some(target_node) = pool.iter().find(|n| n.metadata.name.as_deref() == Some(target.as_str())) {
                        let target_ref = node_ref(&project, target_node);
                        match cloud.attach(&target_ref, *ip).await {
                            Ok(()) => {
                                ip_ctx.info(&format!("re-attached to healthy node {target}"));
                                let _ = labels.mark_ready(&target, &ip_ctx).await;
                                free.remove(&target);
                                assignments.push(IpAssignment { ip: ip.to_string(), node: target.clone() });
                                attached_count += 1;
                                metrics::IP_ATTACHED
                                    .with_label_values(&[&name, &ip.to_string(), &target])
                                    .set(1.0);
                                metrics::NODE_IP_READY.with_label_values(&[&name, &target]).set(1.0);
                                reattached = true;
                            }
                            Err(e) => {
                                ip_ctx.error(&format!("failed to re-attach to {target}: {e}"));
                                any_failure = true;
                            }
                        }
                    }
                } else {
                    ip_ctx.warn("no healthy node found to re-attach IP");
                }
                if !reattached {
                    unattached_count += 1;
                }
            }
            IpAction::Attach { node } => {
                let Some(target_node) = pool.iter().find(|n| n.metadata.name.as_deref() == Some(node.as_str())) else {
                    continue;
                };
                let target_ref = node_ref(&project, target_node);
                match cloud.attach(&target_ref, *ip).await {
                    Ok(()) => {
                        free.remove(&node);
                        if let Err(e) = labels.mark_ready(&node, &ip_ctx).await {
                            ip_ctx.error(&format!("failed to label {node} after attach: {e}"));
                        }
                        assignments.push(IpAssignment { ip: ip.to_string(), node: node.clone() });
                        attached_count += 1;
                        metrics::IP_ATTACH_TOTAL.with_label_values(&[&name, "success"]).inc();
                        metrics::IP_ATTACHED.with_label_values(&[&name, &ip.to_string(), &node]).set(1.0);
                        metrics::NODE_IP_READY.with_label_values(&[&name, &node]).set(1.0);
                    }
                    Err(e) => {
                        ip_ctx.error(&format!("failed to attach to {node}: {e}"));
                        metrics::IP_ATTACH_TOTAL.with_label_values(&[&name, "error"]).inc();
                        metrics::GCP_API_ERRORS_TOTAL
                            .with_label_values(&["attach", "api_error"])
                            .inc();
                        unattached_count += 1;
                        any_failure = true;
                    }
                }
            }
            IpAction::NoFreeNode => {
                ip_ctx.warn("no schedulable free nodes available for IP");
                unattached_count += 1;
                metrics::IP_ATTACHED.with_label_values(&[&name, &ip.to_string(), "none"]).set(0.0);
            }
        }
    }

    metrics::RECONCILE_DURATION_SECONDS
        .with_label_values(&[&name])
        .observe(start.elapsed().as_secs_f64());
    metrics::ATTACHED_IPS.with_label_values(&[&name]).set(attached_count as f64);
    metrics::UNATTACHED_IPS.with_label_values(&[&name]).set(unattached_count as f64);

    let healthy = !any_failure && unattached_count == 0;
    metrics::CRD_STATUS.with_label_values(&[&name]).set(if healthy { 1.0 } else { 0.0 });
    metrics::RECONCILE_TOTAL
        .with_label_values(&[&name, if healthy { "success" } else { "error" }])
        .inc();

    cleanup_sweep(cloud, cluster, labels, evictor, &spec.cloud.project, &reserved_ips, spec.workload_ref.as_ref(), all_nodes, &ctx).await;

    patch_status(client, instance, |status| {
        status.healthy = healthy;
        status.reserved_count = reserved_ips.len() as u32;
        status.attached_count = attached_count;
        status.unattached_count = unattached_count;
        status.assignments = assignments.clone();
        status.message = if healthy { None } else { Some("one or more IPs could not be converged".to_string()) };
    })
    .await?;

    Ok(())
}

/// Step 5: strips `ip.ready=true` from any cluster node that holds none of
/// `reserved_ips`, evicting `workload_ref`'s pods from it when set. Failures
/// are logged and do not affect the assignments already made above.
#[allow(clippy::too_many_arguments)]
async fn cleanup_sweep(
    cloud: &dyn CloudBinding,
    cluster_view: &ClusterView,
    labels: &LabelPatcher,
    evictor: &WorkloadEvictor,
    project: &str,
    reserved_ips: &[Ipv4Addr],
    workload_ref: Option<&netctl_types::WorkloadRef>,
    all_nodes: &[Node],
    ctx: &LogContext,
) {
    ctx.info("checking for incorrectly labeled nodes");
    for node in all_nodes {
        if !has_ready_label(node) {
            continue;
        }
        let node_name = node.metadata.name.clone().unwrap_or_default();
        let node_ref = node_ref(project, node);
        let has_valid_ip = cloud.has_any_of(&node_ref, reserved_ips).await;
        if plan::needs_label_cleanup(true, has_valid_ip) {
            ctx.warn(&format!("node {node_name} is labeled ip.ready but has no valid reserved IP"));
            if let Err(e) = labels.clear_ready(&node_name, ctx).await {
                ctx.error(&format!("failed to remove ip.ready label from {node_name}: {e}"));
            }
            if let Some(workload_ref) = workload_ref {
                match cluster_view.pods_on_node(&node_name).await {
                    Ok(pods) => evictor.evict_workload_pods_from(&node_name, &pods, workload_ref, ctx).await,
                    Err(e) => ctx.error(&format!("failed to list pods on {node_name} during cleanup: {e}")),
                }
            }
        }
    }
}

fn node_ref(project: &str, node: &Node) -> NodeRef {
    NodeRef {
        project: project.to_string(),
        zone: cluster::zone(node).unwrap_or_default(),
        instance_name: node.metadata.name.clone().unwrap_or_default(),
    }
}

fn has_ready_label(node: &Node) -> bool {
    node.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(netctl_common::IP_READY_LABEL))
        .map(|v| v == "true")
        .unwrap_or(false)
}
