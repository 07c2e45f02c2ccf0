//! Forced eviction of a workload's pods off a node: zero grace period,
//! best-effort per pod.

use k8s_openapi::api::core::v1::Pod;
use kube::api::DeleteParams;
use kube::{Api, Client, ResourceExt};
use netctl_types::WorkloadRef;

use netctl_common::logctx::LogContext;

use crate::cluster;

pub struct WorkloadEvictor {
    client: Client,
}

impl WorkloadEvictor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Force-deletes every live pod on `node_name` owned by `workload_ref`.
    /// Per-pod failures are logged and do not abort the sweep.
    pub async fn evict_workload_pods_from(
        &self,
        node_name: &str,
        pods_on_node: &[Pod],
        workload_ref: &WorkloadRef,
        ctx: &LogContext,
    ) {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &workload_ref.namespace);
        let delete_params = DeleteParams {
            grace_period_seconds: Some(0),
            ..Default::default()
        };

        for pod in pods_on_node {
            if pod.metadata.namespace.as_deref() != Some(workload_ref.namespace.as_str()) {
                continue;
            }
            if !cluster::owned_by_workload(pod, workload_ref) {
                continue;
            }
            let pod_name = pod.name_any();
            match api.delete(&pod_name, &delete_params).await {
                Ok(_) => ctx
                    .with_node(node_name)
                    .warn(&format!("evicted pod {}/{pod_name} from invalid node", workload_ref.namespace)),
                Err(e) => ctx
                    .with_node(node_name)
                    .error(&format!("failed to evict pod {pod_name}: {e}")),
            }
        }
    }
}
