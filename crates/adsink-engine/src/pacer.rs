//! Tenant-scoped dispatch pacing.
//!
//! Each run owns one pacer shared by its workers; its lifecycle ends with
//! the worker pool rather than the process, so one tenant's pacing never
//! leaks into another's.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum gap between job dispatches within one tenant's pool,
/// keeping steady-state request rates under the upstream per-account limit
/// even when every job succeeds first try.
pub struct TenantPacer {
    min_gap: Duration,
    last_dispatch: Mutex<Option<Instant>>,
}

impl TenantPacer {
    #[must_use]
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_dispatch: Mutex::new(None),
        }
    }

    /// Waits until at least `min_gap` has passed since the previous dispatch,
    /// then records this one. Workers racing here queue on the internal lock,
    /// which spaces them out in arrival order.
    pub async fn pace(&self) {
        let mut last = self.last_dispatch.lock().await;
        if let Some(prev) = *last {
            let earliest = prev + self.min_gap;
            let now = Instant::now();
            if earliest > now {
                tokio::time::sleep_until(earliest).await;
            }
        }
        *last = Some(Instant::now());
    }
}
