//! Node label patching: idempotent merge-patch of the `ip.ready` label.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Node;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};

use netctl_common::{MANAGER_NAME, logctx::LogContext};

use crate::util::Error;

pub struct LabelPatcher {
    nodes: Api<Node>,
}

impl LabelPatcher {
    pub fn new(client: Client) -> Self {
        Self {
            nodes: Api::all(client),
        }
    }

    /// Sets `ip.ready=true` on `node_name`. No-op if already set.
    pub async fn mark_ready(&self, node_name: &str, ctx: &LogContext) -> Result<(), Error> {
        self.patch(node_name, netctl_common::IP_READY_LABEL, Some("true"), ctx)
            .await
    }

    /// Clears the `ip.ready` label from `node_name`. No-op if already absent.
    pub async fn clear_ready(&self, node_name: &str, ctx: &LogContext) -> Result<(), Error> {
        self.patch(node_name, netctl_common::IP_READY_LABEL, None, ctx)
            .await
    }

    async fn patch(
        &self,
        node_name: &str,
        key: &str,
        value: Option<&str>,
        ctx: &LogContext,
    ) -> Result<(), Error> {
        let mut labels = BTreeMap::new();
        labels.insert(key.to_string(), value.map(str::to_string));
        let body = serde_json::json!({ "metadata": { "labels": labels } });
        self.nodes
            .patch(
                node_name,
                &PatchParams::apply(MANAGER_NAME),
                &Patch::Merge(&body),
            )
            .await?;
        ctx.with_node(node_name)
            .info(&format!("patched node label {key}={value:?}"));
        Ok(())
    }
}
