//! GCP Compute Engine `CloudBinding`. Talks to the Compute Engine REST API
//! directly over `reqwest` (no generated client library exists for Rust).
//! Re-attaching a detached IP to a replacement node is not this trait's
//! concern: that is an orchestration decision made by the reconcile engine,
//! which calls `detach` and `attach` on two different `NodeRef`s itself.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::credentials::CredentialCache;
use super::{CloudBinding, CloudError, NodeRef};

const API_BASE: &str = "https://compute.googleapis.com/compute/v1";
const ACCESS_CONFIG_NAME: &str = "external-nat";
const ACCESS_CONFIG_TYPE: &str = "ONE_TO_ONE_NAT";

pub struct GcpCloudBinding {
    credentials: CredentialCache,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct Instance {
    #[serde(default, rename = "networkInterfaces")]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Deserialize)]
struct NetworkInterface {
    name: String,
    #[serde(default, rename = "accessConfigs")]
    access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Deserialize)]
struct AccessConfig {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "natIP")]
    nat_ip: Option<String>,
}

#[derive(Debug, Serialize)]
struct AddAccessConfigBody<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(rename = "natIP")]
    nat_ip: &'a str,
}

impl GcpCloudBinding {
    pub fn new(credentials: CredentialCache) -> Self {
        Self {
            credentials,
            http: super::http_client(),
        }
    }

    async fn get_instance(&self, node: &NodeRef) -> Result<Instance, CloudError> {
        let token = self
            .credentials
            .access_token()
            .await
            .map_err(|e| CloudError::Permission(e.to_string()))?;
        let url = format!(
            "{API_BASE}/projects/{}/zones/{}/instances/{}",
            node.project, node.zone, node.instance_name
        );
        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| CloudError::Transient(e.to_string()))?;
        classify_status(&resp)?;
        resp.json::<Instance>()
            .await
            .map_err(|e| CloudError::Unexpected(e.to_string()))
    }

    fn primary_interface(instance: &Instance) -> Option<&NetworkInterface> {
        instance.network_interfaces.first()
    }
}

fn classify_status(resp: &reqwest::Response) -> Result<(), CloudError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    match status.as_u16() {
        403 => Err(CloudError::Permission(format!("HTTP {status}"))),
        404 => Err(CloudError::NotFound(format!("HTTP {status}"))),
        429 | 500..=599 => Err(CloudError::Transient(format!("HTTP {status}"))),
        _ => Err(CloudError::Unexpected(format!("HTTP {status}"))),
    }
}

/// A failed instance read is still counted, even though `has_ip`/
/// `has_any_of` themselves only ever return a bare bool to their caller.
fn count_read_error(e: &CloudError) {
    let error_type = match e {
        CloudError::Transient(_) => "transient",
        CloudError::Permission(_) => "permission",
        CloudError::NotFound(_) => "not_found",
        CloudError::Unexpected(_) => "unexpected",
    };
    crate::reconcile::metrics::GCP_API_ERRORS_TOTAL
        .with_label_values(&["read", error_type])
        .inc();
}

#[async_trait]
impl CloudBinding for GcpCloudBinding {
    async fn has_ip(&self, node: &NodeRef, ip: Ipv4Addr) -> bool {
        let ip = ip.to_string();
        match self.get_instance(node).await {
            Ok(instance) => instance
                .network_interfaces
                .iter()
                .flat_map(|iface| iface.access_configs.iter())
                .any(|ac| ac.nat_ip.as_deref() == Some(ip.as_str())),
            Err(e) => {
                count_read_error(&e);
                false
            }
        }
    }

    async fn has_any_of(&self, node: &NodeRef, ips: &[Ipv4Addr]) -> bool {
        match self.get_instance(node).await {
            Ok(instance) => instance
                .network_interfaces
                .iter()
                .flat_map(|iface| iface.access_configs.iter())
                .filter_map(|ac| ac.nat_ip.as_deref())
                .any(|nat_ip| ips.iter().any(|ip| ip.to_string() == nat_ip)),
            Err(e) => {
                count_read_error(&e);
                false
            }
        }
    }

    async fn attach(&self, node: &NodeRef, ip: Ipv4Addr) -> Result<(), CloudError> {
        let instance = self.get_instance(node).await?;
        let iface = Self::primary_interface(&instance).ok_or_else(|| {
            CloudError::Unexpected("instance has no network interfaces".to_string())
        })?;
        let ip_str = ip.to_string();

        if let Some(existing) = iface
            .access_configs
            .iter()
            .find(|ac| ac.kind == ACCESS_CONFIG_TYPE)
        {
            if existing.nat_ip.as_deref() == Some(ip_str.as_str()) {
                return Ok(());
            }
            self.delete_access_config(node, &iface.name, &existing.name)
                .await?;
        }

        self.add_access_config(node, &iface.name, &ip_str).await
    }

    async fn detach(&self, node: &NodeRef, ip: Ipv4Addr) -> Result<(), CloudError> {
        let instance = self.get_instance(node).await?;
        let Some(iface) = Self::primary_interface(&instance) else {
            return Ok(());
        };
        let ip_str = ip.to_string();
        let Some(existing) = iface
            .access_configs
            .iter()
            .find(|ac| ac.nat_ip.as_deref() == Some(ip_str.as_str()))
        else {
            return Ok(());
        };
        self.delete_access_config(node, &iface.name, &existing.name)
            .await
    }
}

impl GcpCloudBinding {
    async fn delete_access_config(
        &self,
        node: &NodeRef,
        network_interface: &str,
        access_config: &str,
    ) -> Result<(), CloudError> {
        let token = self
            .credentials
            .access_token()
            .await
            .map_err(|e| CloudError::Permission(e.to_string()))?;
        let url = format!(
            "{API_BASE}/projects/{}/zones/{}/instances/{}/deleteAccessConfig",
            node.project, node.zone, node.instance_name
        );
        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .query(&[
                ("accessConfig", access_config),
                ("networkInterface", network_interface),
            ])
            .send()
            .await
            .map_err(|e| CloudError::Transient(e.to_string()))?;
        classify_status(&resp)
    }

    async fn add_access_config(
        &self,
        node: &NodeRef,
        network_interface: &str,
        ip: &str,
    ) -> Result<(), CloudError> {
        let token = self
            .credentials
            .access_token()
            .await
            .map_err(|e| CloudError::Permission(e.to_string()))?;
        let url = format!(
            "{API_BASE}/projects/{}/zones/{}/instances/{}/addAccessConfig",
            node.project, node.zone, node.instance_name
        );
        let body = AddAccessConfigBody {
            name: ACCESS_CONFIG_NAME,
            kind: ACCESS_CONFIG_TYPE,
            nat_ip: ip,
        };
        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .query(&[("networkInterface", network_interface)])
            .json(&body)
            .send()
            .await
            .map_err(|e| CloudError::Transient(e.to_string()))?;
        classify_status(&resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> NodeRef {
        NodeRef {
            project: "proj".into(),
            zone: "us-central1-a".into(),
            instance_name: "node-a".into(),
        }
    }

    #[test]
    fn classify_status_maps_permission_and_not_found() {
        assert!(matches!(
            CloudError::Permission("x".into()).is_retryable(),
            true
        ));
        assert!(!CloudError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn node_ref_is_hashable_for_dedup() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(node());
        assert!(set.contains(&node()));
    }
}
