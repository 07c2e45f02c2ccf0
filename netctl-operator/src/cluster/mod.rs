//! Cluster-facing node and pod queries: listing, schedulability/readiness
//! predicates, drain detection, and healthy-replacement lookup.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::ListParams;
use kube::{Api, Client};
use netctl_types::WorkloadRef;

use crate::util::{Error, SYSTEM_NAMESPACES, ZONE_LABEL};

pub struct ClusterView {
    nodes: Api<Node>,
    pods: Api<Pod>,
}

impl ClusterView {
    pub fn new(client: Client) -> Self {
        Self {
            nodes: Api::all(client.clone()),
            pods: Api::all(client),
        }
    }

    /// Lists nodes matching `selector`, an exact-match AND of key/value pairs.
    pub async fn list_nodes(&self, selector: &BTreeMap<String, String>) -> Result<Vec<Node>, Error> {
        let label_selector = selector
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        let params = if label_selector.is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(&label_selector)
        };
        Ok(self.nodes.list(&params).await?.items)
    }

    /// Lists every node in the cluster, used by the cleanup sweep.
    pub async fn list_all_nodes(&self) -> Result<Vec<Node>, Error> {
        Ok(self.nodes.list(&ListParams::default()).await?.items)
    }

    /// All pods scheduled onto `node_name`, across every namespace.
    pub async fn pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>, Error> {
        let params = ListParams::default().fields(&format!("spec.nodeName={node_name}"));
        Ok(self.pods.list(&params).await?.items)
    }
}

pub fn schedulable(node: &Node) -> bool {
    !node
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false)
}

pub fn ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

pub fn zone(node: &Node) -> Option<String> {
    node.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(ZONE_LABEL))
        .cloned()
}

fn matches_selector(node: &Node, selector: &BTreeMap<String, String>) -> bool {
    let labels = node.metadata.labels.clone().unwrap_or_default();
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

fn is_daemonset_owned(pod: &Pod) -> bool {
    pod.metadata
        .owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.kind == "DaemonSet"))
}

fn is_live(pod: &Pod) -> bool {
    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
    matches!(phase, Some("Running") | Some("Pending")) && pod.metadata.deletion_timestamp.is_none()
}

/// True if an owner reference on `pod` matches `workload_ref`'s ownership
/// rule: `ReplicaSet` name-prefix for `Deployment`, exact name for
/// `StatefulSet`/`DaemonSet`.
pub fn owned_by_workload(pod: &Pod, workload_ref: &WorkloadRef) -> bool {
    let Some(owners) = pod.metadata.owner_references.as_ref() else {
        return false;
    };
    owners.iter().any(|owner| {
        use netctl_types::WorkloadKind::*;
        match workload_ref.kind {
            Deployment => owner.kind == "ReplicaSet" && owner.name.starts_with(&workload_ref.name),
            StatefulSet => owner.kind == "StatefulSet" && owner.name == workload_ref.name,
            DaemonSet => owner.kind == "DaemonSet" && owner.name == workload_ref.name,
        }
    })
}

/// A node is drained when it is cordoned and carries no live, non-DaemonSet
/// pod outside the system namespaces that either belongs to `workload_ref`
/// (when set) or carries `controller_label` (when it is not).
pub fn is_drained(
    node: &Node,
    pods_on_node: &[Pod],
    workload_ref: Option<&WorkloadRef>,
    controller_label: &str,
) -> bool {
    if schedulable(node) {
        return false;
    }

    for pod in pods_on_node {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
        if SYSTEM_NAMESPACES.contains(&namespace) {
            continue;
        }
        if is_daemonset_owned(pod) {
            continue;
        }
        if !is_live(pod) {
            continue;
        }
        match workload_ref {
            Some(workload_ref) => {
                if namespace == workload_ref.namespace && owned_by_workload(pod, workload_ref) {
                    return false;
                }
            }
            None => {
                if pod
                    .metadata
                    .labels
                    .as_ref()
                    .is_some_and(|labels| labels.contains_key(controller_label))
                {
                    return false;
                }
            }
        }
    }
    true
}

/// True if `workload_ref`'s pods have a live instance scheduled on `node_name`.
pub fn has_workload_pods(pods_on_node: &[Pod], workload_ref: &WorkloadRef) -> bool {
    pods_on_node.iter().any(|pod| {
        is_live(pod)
            && pod.metadata.namespace.as_deref() == Some(workload_ref.namespace.as_str())
            && owned_by_workload(pod, workload_ref)
    })
}

/// First schedulable, ready node matching `selector`, excluding `exclude`.
/// Mirrors `find_healthy_node`'s first-match semantics (no load balancing).
pub fn find_healthy_node<'a>(
    nodes: &'a [Node],
    selector: &BTreeMap<String, String>,
    exclude: Option<&str>,
) -> Option<&'a Node> {
    nodes.iter().find(|node| {
        let name = node.metadata.name.as_deref().unwrap_or_default();
        if Some(name) == exclude {
            return false;
        }
        schedulable(node) && ready(node) && matches_selector(node, selector)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeCondition, NodeSpec, NodeStatus, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
    use netctl_types::WorkloadKind;

    fn node(name: &str, unschedulable: bool, labels: &[(&str, &str)]) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                unschedulable: Some(unschedulable),
                ..Default::default()
            }),
            status: Some(NodeStatus {
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }

    fn pod_owned_by(kind: &str, owner_name: &str, namespace: &str, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                owner_references: Some(vec![OwnerReference {
                    kind: kind.to_string(),
                    name: owner_name.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn workload(kind: WorkloadKind, name: &str, namespace: &str) -> WorkloadRef {
        WorkloadRef {
            kind,
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    #[test]
    fn schedulable_node_is_never_drained() {
        let n = node("a", false, &[]);
        assert!(!is_drained(&n, &[], None, "app"));
    }

    #[test]
    fn cordoned_node_with_no_relevant_pods_is_drained() {
        let n = node("a", true, &[]);
        let pods = vec![pod_owned_by("DaemonSet", "ds", "default", "Running")];
        assert!(is_drained(&n, &pods, None, "app"));
    }

    #[test]
    fn cordoned_node_with_live_deployment_pod_is_not_drained() {
        let n = node("a", true, &[]);
        let wl = workload(WorkloadKind::Deployment, "api", "default");
        let pods = vec![pod_owned_by("ReplicaSet", "api-7c9f8b", "default", "Running")];
        assert!(!is_drained(&n, &pods, Some(&wl), "app"));
    }

    #[test]
    fn cordoned_node_with_deleted_deployment_pod_is_drained() {
        let n = node("a", true, &[]);
        let wl = workload(WorkloadKind::Deployment, "api", "default");
        let mut pod = pod_owned_by("ReplicaSet", "api-7c9f8b", "default", "Running");
        pod.metadata.deletion_timestamp = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
            chrono::Utc::now(),
        ));
        assert!(is_drained(&n, &[pod], Some(&wl), "app"));
    }

    #[test]
    fn system_namespace_pods_never_block_drain() {
        let n = node("a", true, &[]);
        let pods = vec![pod_owned_by("ReplicaSet", "coredns-abc", "kube-system", "Running")];
        assert!(is_drained(&n, &pods, None, "app"));
    }

    #[test]
    fn statefulset_requires_exact_name_match() {
        let wl = workload(WorkloadKind::StatefulSet, "db", "default");
        let pods = vec![pod_owned_by("StatefulSet", "db-other", "default", "Running")];
        assert!(!has_workload_pods(&pods, &wl));
        let pods = vec![pod_owned_by("StatefulSet", "db", "default", "Running")];
        assert!(has_workload_pods(&pods, &wl));
    }

    #[test]
    fn find_healthy_node_skips_excluded_and_cordoned() {
        let nodes = vec![
            node("a", true, &[("pool", "x")]),
            node("b", false, &[("pool", "x")]),
            node("c", false, &[("pool", "x")]),
        ];
        let selector = BTreeMap::from([("pool".to_string(), "x".to_string())]);
        let found = find_healthy_node(&nodes, &selector, Some("b")).unwrap();
        assert_eq!(found.metadata.name.as_deref(), Some("c"));
    }

    #[test]
    fn find_healthy_node_respects_selector_mismatch() {
        let nodes = vec![node("a", false, &[("pool", "y")])];
        let selector = BTreeMap::from([("pool".to_string(), "x".to_string())]);
        assert!(find_healthy_node(&nodes, &selector, None).is_none());
    }
}
