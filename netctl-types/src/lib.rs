use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadRef {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudParams {
    pub project: String,
    /// Zone or region the candidate node pool lives in. Nodes are looked up
    /// by their own `topology.kubernetes.io/zone` label; this is mainly
    /// informational and used as a fallback when a node carries no zone label.
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// Path to a service account key file, or absent to use ambient
    /// workload-identity / node-default credentials.
    #[serde(default)]
    pub credentials: Option<String>,
}

fn default_reconcile_interval() -> u32 {
    30
}

#[derive(
    CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema,
)]
#[kube(
    group = "netinfra.darkbrains.com",
    version = "v1alpha1",
    kind = "IPAllocation",
    plural = "netipallocations",
    derive = "PartialEq",
    status = "IPAllocationStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.healthy\", \"name\": \"HEALTHY\", \"type\": \"boolean\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.attachedCount\", \"name\": \"ATTACHED\", \"type\": \"integer\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.lastReconcileTime\", \"name\": \"AGE\", \"type\": \"date\" }"
)]
#[serde(rename_all = "camelCase")]
pub struct IPAllocationSpec {
    /// Ordered, duplicate-free sequence of reserved IPv4 literals.
    #[serde(rename = "reservedIPs")]
    pub reserved_ips: Vec<String>,
    /// Label equality selector over the candidate node pool.
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub workload_ref: Option<WorkloadRef>,
    #[serde(default)]
    pub cloud: CloudParams,
    /// Minimum spacing, in seconds, between two reconciles of this resource.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval: u32,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IpAssignment {
    pub ip: String,
    pub node: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IPAllocationStatus {
    /// True iff the most recent reconcile left zero unattached IPs and zero
    /// per-IP failures. Backs the `crd_status` metric gauge.
    #[serde(default)]
    pub healthy: bool,
    #[serde(default)]
    pub reserved_count: u32,
    #[serde(default)]
    pub attached_count: u32,
    #[serde(default)]
    pub unattached_count: u32,
    #[serde(default)]
    pub assignments: Vec<IpAssignment>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "lastReconcileTime", default)]
    pub last_reconcile_time: Option<Time>,
}
