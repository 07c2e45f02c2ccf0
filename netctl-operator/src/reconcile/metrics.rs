//! Per-`IPAllocation` metrics, registered into the shared
//! `netctl_common::metrics::REGISTRY` alongside the controller-wide gauges.
//! All names share the `netipallocation_` prefix so they group together in
//! dashboards and alert rules.

use lazy_static::lazy_static;
use prometheus::{CounterVec, GaugeVec, HistogramVec, Opts, histogram_opts};

use netctl_common::metrics::REGISTRY;

lazy_static! {
    pub static ref CRD_STATUS: GaugeVec =
        gauge("netipallocation_crd_status", "1 iff the last reconcile converged with zero failures and zero unattached IPs.", &["crd_name"]);
    pub static ref RESERVED_IPS: GaugeVec =
        gauge("netipallocation_reserved_ips", "Count of reservedIPs declared on the resource.", &["crd_name"]);
    pub static ref ATTACHED_IPS: GaugeVec =
        gauge("netipallocation_attached_ips", "Count of IPs currently attached.", &["crd_name"]);
    pub static ref UNATTACHED_IPS: GaugeVec =
        gauge("netipallocation_unattached_ips", "Count of IPs that could not be attached this reconcile.", &["crd_name"]);
    pub static ref IP_ATTACHED: GaugeVec =
        gauge("netipallocation_ip_attached", "1 iff this (crd, ip) pair is attached to `node`.", &["crd_name", "ip", "node"]);
    pub static ref NODE_IP_READY: GaugeVec =
        gauge("netipallocation_node_ip_ready", "Value of the ip.ready label on this node, as last observed.", &["crd_name", "node"]);
    pub static ref NODE_CORDONED: GaugeVec =
        gauge("netipallocation_node_cordoned", "1 iff the node is cordoned (unschedulable).", &["node"]);
    pub static ref IP_ATTACH_TOTAL: CounterVec =
        counter("netipallocation_ip_attach_total", "Attach attempts by outcome.", &["crd_name", "status"]);
    pub static ref IP_DETACH_TOTAL: CounterVec =
        counter("netipallocation_ip_detach_total", "Detach attempts by outcome.", &["crd_name", "status"]);
    pub static ref RECONCILE_TOTAL: CounterVec =
        counter("netipallocation_reconcile_total", "Reconciles by outcome.", &["crd_name", "status"]);
    pub static ref GCP_API_ERRORS_TOTAL: CounterVec =
        counter("netipallocation_gcp_api_errors_total", "Cloud provider API errors by operation and error type.", &["operation", "error_type"]);
    pub static ref RECONCILE_DURATION_SECONDS: HistogramVec = {
        let histogram = HistogramVec::new(
            histogram_opts!("netipallocation_reconcile_duration_seconds", "Wall-clock duration of one resource's reconcile."),
            &["crd_name"],
        )
        .expect("valid metric spec");
        REGISTRY
            .register(Box::new(histogram.clone()))
            .expect("metric name registered exactly once");
        histogram
    };
}

fn gauge(name: &str, help: &str, labels: &[&str]) -> GaugeVec {
    let g = GaugeVec::new(Opts::new(name, help), labels).expect("valid metric spec");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric name registered exactly once");
    g
}

fn counter(name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("valid metric spec");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric name registered exactly once");
    c
}

/// Touches every lazy metric so they register (and appear in `/metrics`,
/// reporting zero) even before the first reconcile observes them.
pub fn init() {
    lazy_static::initialize(&CRD_STATUS);
    lazy_static::initialize(&RESERVED_IPS);
    lazy_static::initialize(&ATTACHED_IPS);
    lazy_static::initialize(&UNATTACHED_IPS);
    lazy_static::initialize(&IP_ATTACHED);
    lazy_static::initialize(&NODE_IP_READY);
    lazy_static::initialize(&NODE_CORDONED);
    lazy_static::initialize(&IP_ATTACH_TOTAL);
    lazy_static::initialize(&IP_DETACH_TOTAL);
    lazy_static::initialize(&RECONCILE_TOTAL);
    lazy_static::initialize(&GCP_API_ERRORS_TOTAL);
    lazy_static::initialize(&RECONCILE_DURATION_SECONDS);
}
