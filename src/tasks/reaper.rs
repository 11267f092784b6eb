//! Periodic Reap Task
//!
//! Background task that periodically removes expired cache entries.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Something that can drop its expired entries on demand.
pub(crate) trait Reap: Send + Sync + 'static {
    /// Removes every stale entry and returns how many were removed.
    fn reap(&self) -> usize;
}

/// Spawns a background task that calls [`Reap::reap`] every `interval`.
///
/// The task only holds a weak reference, so it never keeps a cache alive;
/// it exits on its own once the target is dropped.
///
/// # Arguments
/// * `target` - Weak reference to whatever owns the expired entries
/// * `interval` - Time between reap passes
///
/// # Returns
/// A JoinHandle for the spawned task. Abort it to stop reaping early.
///
/// Must be called from within a Tokio runtime.
///
/// # Example
/// ```ignore
/// let handle = spawn_reap_task(Arc::downgrade(&inner), Duration::from_secs(1));
/// // Later, when reaping is switched off:
/// handle.abort();
/// ```
pub(crate) fn spawn_reap_task<T: Reap>(target: Weak<T>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Starting reap task");

        loop {
            tokio::time::sleep(interval).await;

            let Some(target) = target.upgrade() else {
                debug!("Reap target dropped, stopping reap task");
                break;
            };

            let removed = target.reap();
            if removed > 0 {
                info!("Reap: removed {} expired entries", removed);
            } else {
                debug!("Reap: no expired entries found");
            }
        }
    })
}
