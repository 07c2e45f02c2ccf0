use std::time::Duration;

mod error;
pub mod patch;

pub use error::Error;

/// Fallback spacing between reconciles of a resource when its
/// `reconcileInterval` cannot be trusted (missing, non-positive).
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// How often the scheduler sweeps the CRD list to check per-resource
/// intervals.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// System namespaces whose pods never block a drain decision.
pub const SYSTEM_NAMESPACES: &[&str] = &["kube-system", "gke-system", "istio-system"];

/// Label carrying a node's cloud availability zone.
pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";
