pub mod colors;
pub mod http;
pub mod logctx;
pub mod metrics;
pub mod shutdown;
pub mod state;

/// Name of the field manager used for every patch this controller issues.
pub const MANAGER_NAME: &str = "netctl-operator";

/// Node label that records whether a node currently carries a reserved IP.
pub const IP_READY_LABEL: &str = "ip.ready";

/// Pod annotation set on the controller's own pod while it holds the lease.
pub const LEADER_ANNOTATION: &str = "controller-leader";
