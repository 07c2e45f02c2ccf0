//! Process configuration: a `clap::Parser` struct with `env = "..."` on
//! every field, so the same binary can be driven by flags in a shell or by
//! the env vars a Deployment manifest sets.

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Name of the coordination.k8s.io/v1 Lease used for leader election.
    #[arg(long, env = "LEASE_NAME", default_value = "ip-address-controller-leader")]
    pub lease_name: String,

    /// Lease duration in seconds.
    #[arg(long, env = "LEASE_DURATION", default_value_t = 60)]
    pub lease_duration_secs: u64,

    /// Clock-skew grace added to the lease expiry deadline, in seconds.
    #[arg(long, env = "LEASE_SKEW_GRACE_SEC", default_value_t = 2)]
    pub lease_skew_grace_secs: u64,

    /// Port the Prometheus text exposition endpoint listens on.
    #[arg(long, env = "METRICS_PORT", default_value_t = 9999)]
    pub metrics_port: u16,

    /// Reported in the `netipallocation_controller_info` metric and in logs.
    #[arg(long, env = "CONTROLLER_VERSION", default_value = "dev")]
    pub controller_version: String,

    /// Own namespace. Falls back to the downward-API-mounted serviceaccount
    /// namespace file, then to `"default"`.
    #[arg(long, env = "NAMESPACE")]
    pub namespace: Option<String>,

    /// Own pod name, used as the lease holder identity. Falls back to
    /// `HOSTNAME`, then a random identity.
    #[arg(long, env = "POD_NAME")]
    pub pod_name: Option<String>,
}

const SERVICEACCOUNT_NAMESPACE_FILE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

impl Args {
    /// Resolves the namespace the controller considers its own: the
    /// `--namespace`/`NAMESPACE` override, else the in-cluster downward-API
    /// file, else `"default"`.
    pub fn resolve_namespace(&self) -> String {
        if let Some(ns) = &self.namespace {
            return ns.clone();
        }
        std::fs::read_to_string(SERVICEACCOUNT_NAMESPACE_FILE)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|_| "default".to_string())
    }

    /// Resolves this replica's lease-holder identity.
    pub fn resolve_identity(&self) -> String {
        if let Some(name) = &self.pod_name {
            return name.clone();
        }
        if let Ok(hostname) = std::env::var("HOSTNAME") {
            if !hostname.is_empty() {
                return hostname;
            }
        }
        format!("netctl-operator-{}", uuid::Uuid::new_v4())
    }
}
