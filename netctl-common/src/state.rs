use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

/// Shared process state, written by the lease task and the scheduler task,
/// read by the health endpoints. Guarded by a single mutex: every write is a
/// handful of field assignments, never held across I/O.
#[derive(Debug, Clone)]
pub struct ControllerState {
    pub healthy: bool,
    pub ready: bool,
    pub leader: bool,
    pub bootstrapped: bool,
    pub lease_loop_last_tick: Option<DateTime<Utc>>,
    pub last_reconcile_ok: Option<DateTime<Utc>>,
    pub lease_duration: Duration,
}

impl ControllerState {
    pub fn new(lease_duration: Duration) -> Self {
        Self {
            healthy: true,
            ready: false,
            leader: false,
            bootstrapped: false,
            lease_loop_last_tick: None,
            last_reconcile_ok: None,
            lease_duration,
        }
    }

    /// `true` iff the health/ready endpoints should report readiness:
    /// healthy, bootstrapped, and the lease loop has ticked recently enough
    /// that we trust its last leader/follower determination.
    pub fn is_ready(&self) -> bool {
        if !self.healthy || !self.bootstrapped {
            return false;
        }
        let Some(last_tick) = self.lease_loop_last_tick else {
            return false;
        };
        let max_age = 2 * self.lease_duration.max(Duration::from_secs(5));
        match (Utc::now() - last_tick).to_std() {
            Ok(age) => age <= max_age,
            Err(_) => true, // last_tick in the future (clock skew): don't flap to unready
        }
    }
}

pub type SharedState = Arc<Mutex<ControllerState>>;

pub fn shared(lease_duration: Duration) -> SharedState {
    Arc::new(Mutex::new(ControllerState::new(lease_duration)))
}
