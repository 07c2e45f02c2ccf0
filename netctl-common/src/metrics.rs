//! Shared Prometheus registry plus the controller-wide gauges that are not
//! specific to any one `IPAllocation` (those live in
//! `netctl-operator::reconcile::metrics`, registered into the same
//! registry).

use lazy_static::lazy_static;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref CONTROLLER_IS_LEADER: GaugeVec = register_gauge_vec(
        "netipallocation_controller_is_leader",
        "1 if this replica currently holds the leader lease, else 0.",
    );
    pub static ref CONTROLLER_HEALTHY: GaugeVec = register_gauge_vec(
        "netipallocation_controller_healthy",
        "1 if this replica's process considers itself healthy.",
    );
    pub static ref CONTROLLER_READY: GaugeVec = register_gauge_vec(
        "netipallocation_controller_ready",
        "1 if this replica is ready to serve (leader and lease loop fresh).",
    );
}

fn register_gauge_vec(name: &str, help: &str) -> GaugeVec {
    let gauge = GaugeVec::new(Opts::new(name, help), &["pod_name"]).expect("valid metric spec");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("metric name registered exactly once");
    gauge
}

pub fn set_controller_info(version: &str, pod_name: &str) {
    lazy_static! {
        static ref INFO: prometheus::GaugeVec = {
            let gauge = GaugeVec::new(
                Opts::new("netipallocation_controller_info", "Build info, always 1."),
                &["version", "pod_name"],
            )
            .expect("valid metric spec");
            REGISTRY
                .register(Box::new(gauge.clone()))
                .expect("metric name registered exactly once");
            gauge
        };
    }
    INFO.with_label_values(&[version, pod_name]).set(1.0);
}

/// Renders the full registry (this crate's gauges plus whatever the caller
/// has registered into the same `REGISTRY`) as Prometheus text exposition
/// format.
pub fn encode() -> Vec<u8> {
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&metric_families, &mut buffer)
        .expect("prometheus text encoding never fails for well-formed metric families");
    buffer
}
