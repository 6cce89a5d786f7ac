//! Periodic eviction of expired store entries
//!
//! Spawns a task that asks every registered store to drop its expired
//! entries. Stores evict under the same lock they use for lookups, so the
//! sweep cannot hand out or delete an entry that a request is consuming.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

/// A TTL-bearing store the sweep task can clean.
///
/// Uses `Pin<Box<dyn Future>>` so stores can be held as `Arc<dyn Sweep>`.
pub trait Sweep: Send + Sync {
    /// Label for logs and metrics (e.g. "sessions", "pending_requests")
    fn name(&self) -> &str;

    /// Remove expired entries, returning how many were evicted.
    fn sweep(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>>;
}

/// Spawn a background task that sweeps every target each `interval`.
///
/// Returns a `JoinHandle` for the spawned task; aborting it stops the sweep.
pub fn spawn_sweep_task(
    targets: Vec<Arc<dyn Sweep>>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; stores start empty
        ticker.tick().await;

        loop {
            ticker.tick().await;
            sweep_cycle(&targets).await;
        }
    })
}

/// Run one sweep over all targets.
async fn sweep_cycle(targets: &[Arc<dyn Sweep>]) {
    for target in targets {
        let evicted = target.sweep().await;
        if evicted > 0 {
            debug!(store = target.name(), evicted, "swept expired entries");
            metrics::counter!("gateway_swept_entries_total", "store" => target.name().to_string())
                .increment(evicted as u64);
        }
    }
}
