//! The cloud-binding driver: inspects and mutates the external NAT access
//! configuration of a node's primary NIC. Modeled as a trait so the
//! reconcile engine can be exercised against an in-memory fake without
//! talking to a real cloud.

mod credentials;
pub mod gcp;

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;

pub use credentials::{CredentialCache, CredentialError};
pub use gcp::GcpCloudBinding;

/// Every outbound call to the provider API carries this timeout; a call
/// that exceeds it is classified `CloudError::Transient` rather than
/// blocking the (serial) reconcile loop indefinitely.
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

/// Builds an HTTP client bound to `PROVIDER_TIMEOUT`, shared by the
/// instance-inspection client and the credential-exchange client.
fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(PROVIDER_TIMEOUT)
        .build()
        .expect("building a reqwest client with a fixed timeout never fails")
}

/// Identifies the VM instance backing a node: `(project, zone, instanceName)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub project: String,
    pub zone: String,
    pub instance_name: String,
}

/// Provider-error taxonomy.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CloudError {
    #[error("transient provider API error: {0}")]
    Transient(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unexpected provider error: {0}")]
    Unexpected(String),
}

impl CloudError {
    /// Permission errors are logged at high severity but are otherwise
    /// treated like any other retryable failure: not fatal to the loop.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, CloudError::NotFound(_))
    }
}

#[async_trait]
pub trait CloudBinding: Send + Sync {
    /// True iff any access config on the node's NIC has `natIP == ip`.
    /// Never raises: provider errors are swallowed and counted by the
    /// caller.
    async fn has_ip(&self, node: &NodeRef, ip: Ipv4Addr) -> bool;

    /// Union of `has_ip` across `ips`, evaluated from a single instance
    /// fetch where possible.
    async fn has_any_of(&self, node: &NodeRef, ips: &[Ipv4Addr]) -> bool;

    /// Attaches `ip` as the node's `ONE_TO_ONE_NAT` access config, deleting
    /// any existing one first. No-op if `ip` is already attached.
    async fn attach(&self, node: &NodeRef, ip: Ipv4Addr) -> Result<(), CloudError>;

    /// Detaches `ip` from the node's NIC. Success if it was never attached.
    async fn detach(&self, node: &NodeRef, ip: Ipv4Addr) -> Result<(), CloudError>;
}
