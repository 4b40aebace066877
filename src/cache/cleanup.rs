//! Periodic sweep of expired cache entries.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::ResponseCache;

/// Spawns a task that calls [`ResponseCache::cleanup`] every `interval`.
///
/// The lock is taken only for the duration of the sweep. Abort the returned
/// handle to stop the task.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
pub fn spawn_cleanup_task<T>(cache: Arc<Mutex<ResponseCache<T>>>, interval: Duration) -> JoinHandle<()>
where
    T: Clone + Send + 'static,
{
    tokio::spawn(async move {
        debug!(interval_ms = interval.as_millis(), "starting cache cleanup task");

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .cleanup();

            if removed > 0 {
                info!(removed, "cache cleanup removed expired entries");
            } else {
                debug!("cache cleanup found no expired entries");
            }
        }
    })
}
