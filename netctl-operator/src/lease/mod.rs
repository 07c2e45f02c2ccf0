//! Leader election: read-or-create the lease, evaluate leadership, take
//! over an expired or abandoned one, renew while held. Hand-rolled
//! directly against `coordination.k8s.io/v1::Lease` rather than a
//! leader-election crate, since a holder-pod-liveness check and a
//! pod-annotation side effect need to hook into the renew/takeover cycle.

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;

use netctl_common::logctx::LogContext;

use crate::util::Error;

/// Result of one leadership evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Leader,
    Follower,
}

/// Pure snapshot of a `Lease`'s spec fields, decoupled from the `kube`/
/// `k8s-openapi` types so the decision logic below is unit-testable without
/// constructing a `Lease` object.
#[derive(Debug, Clone)]
pub struct LeaseSnapshot {
    pub holder: Option<String>,
    pub lease_duration_seconds: i32,
    pub renew_time: Option<DateTime<Utc>>,
}

/// `renewTime + leaseDuration + max(skew_grace, 5s) < now`. A `renew_time`
/// in the future (clock skew) is never treated as expired.
pub fn lease_expired(
    renew_time: Option<DateTime<Utc>>,
    lease_duration: Duration,
    skew_grace: Duration,
    now: DateTime<Utc>,
) -> bool {
    let Some(renew_time) = renew_time else {
        return false;
    };
    if renew_time > now {
        return false;
    }
    let grace = skew_grace.max(Duration::from_secs(5));
    let deadline = renew_time + chrono::Duration::from_std(lease_duration + grace).unwrap_or_default();
    now > deadline
}

/// Decides leadership given a lease snapshot and whether the current holder
/// is still a live pod. Returns `None` when the caller must attempt a
/// takeover (expired lease, or the previous holder is gone) -- the caller
/// performs that compare-and-swap itself since it needs the live `Lease`
/// object to patch.
/// `holder_pod_exists` is the caller's precomputed answer to "is the
/// current holder (when it is neither us nor expired) still a live pod?" --
/// a plain bool rather than a callback so this function stays synchronous
/// and trivially testable; the orchestration layer only needs to fetch it
/// when the lease is actually in that state.
pub fn evaluate(
    snapshot: &LeaseSnapshot,
    identity: &str,
    lease_duration: Duration,
    skew_grace: Duration,
    holder_pod_exists: bool,
    now: DateTime<Utc>,
) -> Option<Verdict> {
    let duration = if snapshot.lease_duration_seconds > 0 {
        Duration::from_secs(snapshot.lease_duration_seconds as u64)
    } else {
        lease_duration
    };
    let expired = lease_expired(snapshot.renew_time, duration, skew_grace, now);

    match snapshot.holder.as_deref() {
        Some(holder) if holder == identity && !expired => Some(Verdict::Leader),
        Some(holder) if !holder.is_empty() && holder != identity && !expired => {
            if holder_pod_exists {
                Some(Verdict::Follower)
            } else {
                None
            }
        }
        _ => None,
    }
}

pub struct LeaderLease {
    leases: Api<Lease>,
    pods: Api<k8s_openapi::api::core::v1::Pod>,
    name: String,
    namespace: String,
    identity: String,
    duration: Duration,
    skew_grace: Duration,
}

impl LeaderLease {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        name: impl Into<String>,
        identity: impl Into<String>,
        duration: Duration,
        skew_grace: Duration,
    ) -> Self {
        let namespace = namespace.into();
        Self {
            leases: Api::namespaced(client.clone(), &namespace),
            pods: Api::namespaced(client, &namespace),
            name: name.into(),
            namespace,
            identity: identity.into(),
            duration,
            skew_grace,
        }
    }

    /// One pass of the lease renewal loop: read-or-create the lease,
    /// evaluate leadership, take over if warranted, and renew if we hold it.
    /// Returns the resulting verdict; never panics on apiserver errors, they
    /// fall back to `Follower` so a flaky apiserver never wins leadership.
    pub async fn evaluate_and_renew(&self, ctx: &LogContext) -> (Verdict, bool) {
        let existing = match self.leases.get_opt(&self.name).await {
            Ok(lease) => lease,
            Err(e) => {
                ctx.error(&format!("failed to read lease {}: {e}", self.name));
                return (Verdict::Follower, false);
            }
        };

        let Some(lease) = existing else {
            let outcome = match self.create_lease().await {
                Ok(()) => {
                    ctx.info("acquired leadership (created lease)");
                    (Verdict::Leader, true)
                }
                Err(e) => {
                    ctx.error(&format!("failed to create lease {}: {e}", self.name));
                    (Verdict::Follower, false)
                }
            };
            if outcome.0 == Verdict::Leader {
                self.set_leader_annotation(ctx).await;
            }
            return outcome;
        };

        let snapshot = snapshot_of(&lease);
        let now = Utc::now();
        ctx.info(&format!(
            "lease held by {:?}, renewTime={:?}",
            snapshot.holder, snapshot.renew_time
        ));

        let other_holder_is_live = match snapshot.holder.as_deref() {
            Some(holder) if holder != self.identity && !holder.is_empty() => {
                self.pod_exists(holder).await
            }
            _ => false,
        };

        let verdict = evaluate(
            &snapshot,
            &self.identity,
            self.duration,
            self.skew_grace,
            other_holder_is_live,
            now,
        );

        let outcome = match verdict {
            Some(Verdict::Leader) => match self.renew_lease(&lease).await {
                Ok(()) => (Verdict::Leader, true),
                Err(e) => {
                    ctx.error(&format!("failed to renew lease: {e}"));
                    (Verdict::Follower, false)
                }
            },
            Some(Verdict::Follower) => (Verdict::Follower, true),
            None => match self.try_takeover(lease).await {
                Ok(true) => {
                    ctx.info("acquired leadership (takeover)");
                    (Verdict::Leader, true)
                }
                Ok(false) => (Verdict::Follower, true),
                Err(e) => {
                    ctx.error(&format!("takeover failed: {e}"));
                    (Verdict::Follower, false)
                }
            },
        };
        if outcome.0 == Verdict::Leader {
            self.set_leader_annotation(ctx).await;
        }
        outcome
    }

    async fn pod_exists(&self, name: &str) -> bool {
        match self.pods.get_opt(name).await {
            Ok(pod) => pod.is_some(),
            Err(_) => true, // can't tell: assume it might still be alive
        }
    }

    /// Clears the `controller-leader` annotation from this replica's own
    /// pod. Called on graceful shutdown while `LEADER`; the lease itself is
    /// left untouched so it simply expires.
    pub async fn clear_leader_annotation(&self, ctx: &LogContext) {
        let patch = serde_json::json!({
            "metadata": { "annotations": { netctl_common::LEADER_ANNOTATION: Option::<String>::None } }
        });
        let result = self
            .pods
            .patch(
                &self.identity,
                &PatchParams::apply(netctl_common::MANAGER_NAME),
                &Patch::Merge(&patch),
            )
            .await;
        if let Err(e) = result {
            ctx.warn(&format!(
                "failed to clear {} annotation on demotion: {e}",
                netctl_common::LEADER_ANNOTATION
            ));
        }
    }

    /// Sets the `controller-leader=true` annotation on this replica's own
    /// pod, idempotently, while it holds the lease.
    async fn set_leader_annotation(&self, ctx: &LogContext) {
        let patch = serde_json::json!({
            "metadata": { "annotations": { netctl_common::LEADER_ANNOTATION: "true" } }
        });
        let result = self
            .pods
            .patch(
                &self.identity,
                &PatchParams::apply(netctl_common::MANAGER_NAME),
                &Patch::Merge(&patch),
            )
            .await;
        if let Err(e) = result {
            ctx.warn(&format!("failed to set {} annotation: {e}", netctl_common::LEADER_ANNOTATION));
        }
    }

    async fn create_lease(&self) -> Result<(), Error> {
        let now = Time(Utc::now());
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(self.duration.as_secs() as i32),
                acquire_time: Some(now.clone()),
                renew_time: Some(now),
                lease_transitions: Some(0),
                ..Default::default()
            }),
        };
        self.leases.create(&PostParams::default(), &lease).await?;
        Ok(())
    }

    async fn renew_lease(&self, current: &Lease) -> Result<(), Error> {
        let patch = serde_json::json!({
            "spec": {
                "holderIdentity": self.identity,
                "renewTime": Time(Utc::now()),
            }
        });
        self.leases
            .patch(
                &self.name,
                &PatchParams::apply(netctl_common::MANAGER_NAME),
                &Patch::Merge(&patch),
            )
            .await?;
        let _ = current;
        Ok(())
    }

    /// Compare-and-swap takeover: patches holder/acquireTime/renewTime,
    /// relying on the apiserver's resourceVersion check (carried on `current`
    /// by the typed `Patch::Apply`) to fail with a conflict if another
    /// replica won the race first.
    async fn try_takeover(&self, mut current: Lease) -> Result<bool, Error> {
        let now = Time(Utc::now());
        let transitions = current
            .spec
            .as_ref()
            .and_then(|s| s.lease_transitions)
            .unwrap_or(0);
        if let Some(spec) = current.spec.as_mut() {
            spec.holder_identity = Some(self.identity.clone());
            spec.acquire_time = Some(now.clone());
            spec.renew_time = Some(now);
            spec.lease_transitions = Some(transitions + 1);
        }
        match self
            .leases
            .replace(&self.name, &PostParams::default(), &current)
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Drives the lease task: evaluates and renews every `~duration/3` seconds
/// with ±20% jitter, publishing the verdict into `state` so the health
/// endpoints and the scheduler can read it. On `shutdown`, if leader,
/// clears the leader annotation and flips `ready=false` before returning --
/// the lease itself is left to expire.
pub async fn run(
    lease: LeaderLease,
    state: netctl_common::state::SharedState,
    identity: String,
    shutdown: CancellationToken,
) {
    let ctx = LogContext::new(&identity);
    let base_renew = lease.duration / 3;

    loop {
        let (verdict, ok) = lease.evaluate_and_renew(&ctx).await;
        let ready = {
            let mut guard = state.lock().await;
            guard.leader = verdict == Verdict::Leader;
            guard.lease_loop_last_tick = Some(Utc::now());
            guard.bootstrapped = true;
            guard.healthy = ok;
            guard.ready = guard.healthy && guard.bootstrapped;
            guard.ready
        };
        netctl_common::metrics::CONTROLLER_IS_LEADER
            .with_label_values(&[&identity])
            .set(if verdict == Verdict::Leader { 1.0 } else { 0.0 });
        netctl_common::metrics::CONTROLLER_HEALTHY
            .with_label_values(&[&identity])
            .set(if ok { 1.0 } else { 0.0 });
        netctl_common::metrics::CONTROLLER_READY
            .with_label_values(&[&identity])
            .set(if ready { 1.0 } else { 0.0 });

        let jittered = jittered_renew_interval(base_renew);
        tokio::select! {
            _ = shutdown.cancelled() => {
                if verdict == Verdict::Leader {
                    ctx.info("demoting on shutdown");
                    lease.clear_leader_annotation(&ctx).await;
                }
                state.lock().await.ready = false;
                netctl_common::metrics::CONTROLLER_READY
                    .with_label_values(&[&identity])
                    .set(0.0);
                netctl_common::metrics::CONTROLLER_IS_LEADER
                    .with_label_values(&[&identity])
                    .set(0.0);
                return;
            }
            _ = tokio::time::sleep(jittered) => {}
        }
    }
}

/// `base` with up to ±20% jitter, so replicas renewing on the same cadence
/// don't all hit the apiserver at once.
fn jittered_renew_interval(base: Duration) -> Duration {
    let base_ms = base.as_millis().max(1) as u64;
    let spread = (base_ms as f64 * 0.2) as u64;
    let low = base_ms.saturating_sub(spread);
    let high = base_ms.saturating_add(spread);
    Duration::from_millis(rand::random_range(low..=high))
}

fn snapshot_of(lease: &Lease) -> LeaseSnapshot {
    let spec = lease.spec.clone().unwrap_or_default();
    LeaseSnapshot {
        holder: spec.holder_identity,
        lease_duration_seconds: spec.lease_duration_seconds.unwrap_or(0),
        renew_time: spec.renew_time.map(|t| t.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-07-28T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn future_renew_time_is_never_expired() {
        let future = now() + chrono::Duration::seconds(30);
        assert!(!lease_expired(
            Some(future),
            Duration::from_secs(10),
            Duration::from_secs(2),
            now()
        ));
    }

    #[test]
    fn expiry_uses_max_of_skew_grace_and_five_seconds() {
        let renewed = now() - chrono::Duration::seconds(12);
        // duration 10s + grace max(1,5)=5s => deadline at -12+15=+3s, now is after
        assert!(lease_expired(
            Some(renewed),
            Duration::from_secs(10),
            Duration::from_secs(1),
            now()
        ));
        let renewed = now() - chrono::Duration::seconds(10);
        assert!(!lease_expired(
            Some(renewed),
            Duration::from_secs(10),
            Duration::from_secs(1),
            now()
        ));
    }

    #[test]
    fn absent_lease_is_never_expired() {
        assert!(!lease_expired(None, Duration::from_secs(10), Duration::from_secs(2), now()));
    }

    #[test]
    fn current_holder_with_fresh_lease_stays_leader() {
        let snap = LeaseSnapshot {
            holder: Some("pod-a".to_string()),
            lease_duration_seconds: 60,
            renew_time: Some(now()),
        };
        let verdict = evaluate(
            &snap,
            "pod-a",
            Duration::from_secs(60),
            Duration::from_secs(2),
            true,
            now(),
        );
        assert_eq!(verdict, Some(Verdict::Leader));
    }

    #[test]
    fn other_live_holder_with_fresh_lease_is_followed() {
        let snap = LeaseSnapshot {
            holder: Some("pod-b".to_string()),
            lease_duration_seconds: 60,
            renew_time: Some(now()),
        };
        let verdict = evaluate(
            &snap,
            "pod-a",
            Duration::from_secs(60),
            Duration::from_secs(2),
            true,
            now(),
        );
        assert_eq!(verdict, Some(Verdict::Follower));
    }

    #[test]
    fn dead_holder_triggers_takeover() {
        let snap = LeaseSnapshot {
            holder: Some("pod-b".to_string()),
            lease_duration_seconds: 60,
            renew_time: Some(now()),
        };
        let verdict = evaluate(
            &snap,
            "pod-a",
            Duration::from_secs(60),
            Duration::from_secs(2),
            false,
            now(),
        );
        assert_eq!(verdict, None);
    }

    #[test]
    fn expired_lease_triggers_takeover_even_if_holder_alive() {
        let snap = LeaseSnapshot {
            holder: Some("pod-b".to_string()),
            lease_duration_seconds: 60,
            renew_time: Some(now() - chrono::Duration::seconds(120)),
        };
        let verdict = evaluate(
            &snap,
            "pod-a",
            Duration::from_secs(60),
            Duration::from_secs(2),
            true,
            now(),
        );
        assert_eq!(verdict, None);
    }

    #[test]
    fn empty_holder_triggers_takeover() {
        let snap = LeaseSnapshot {
            holder: Some(String::new()),
            lease_duration_seconds: 60,
            renew_time: Some(now()),
        };
        let verdict = evaluate(
            &snap,
            "pod-a",
            Duration::from_secs(60),
            Duration::from_secs(2),
            true,
            now(),
        );
        assert_eq!(verdict, None);
    }
}
