use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, Error};
use netctl_types::{IPAllocation, IPAllocationStatus};

use netctl_common::MANAGER_NAME;

/// Patches an `IPAllocation`'s status subresource with the result of `f`,
/// computing a JSON-merge diff against the instance as last observed so the
/// patch only touches fields `f` actually changed.
pub async fn patch_status(
    client: Client,
    instance: &IPAllocation,
    f: impl FnOnce(&mut IPAllocationStatus),
) -> Result<IPAllocation, Error> {
    let mut modified = instance.clone();
    let mut status = modified.status.clone().unwrap_or_default();
    f(&mut status);
    status.last_reconcile_time = Some(Time(chrono::Utc::now()));
    modified.status = Some(status);

    let patch = Patch::Json::<IPAllocation>(json_patch::diff(
        &serde_json::to_value(instance).expect("IPAllocation always serializes"),
        &serde_json::to_value(&modified).expect("IPAllocation always serializes"),
    ));

    let name = instance.metadata.name.as_deref().unwrap_or_default();
    let namespace = instance.metadata.namespace.as_deref().unwrap_or("default");
    let api: Api<IPAllocation> = Api::namespaced(client, namespace);
    api.patch_status(name, &PatchParams::apply(MANAGER_NAME), &patch)
        .await
}
