use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::manager::CacheManager;
use crate::primitives::sched::TaskHandle;

/// Starts the background evictor on the cache's scheduler.
///
/// The task wakes when an allocation pushes occupancy above the high-water
/// mark, or every `interval`, and evicts down to the low-water mark. It exits
/// when [`CacheManager::shutdown`] is called.
pub fn spawn_evictor(cache: &Arc<CacheManager>, interval: Duration) -> TaskHandle {
    let task = run(Arc::clone(cache), interval);
    cache.scheduler().spawn(Box::pin(task))
}

async fn run(cache: Arc<CacheManager>, interval: Duration) {
    let mut shutdown = cache.subscribe_shutdown();
    info!(
        high_water = cache.high_water_bytes(),
        low_water = cache.low_water_bytes(),
        "cache.evictor.start"
    );
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = cache.pressure().notified() => {}
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }
        if cache.used_bytes() <= cache.high_water_bytes() {
            continue;
        }
        match cache.shrink_to_low_water().await {
            Ok(evicted) => debug!(evicted, used = cache.used_bytes(), "cache.evictor.sweep"),
            Err(err) => warn!(error = %err, "cache.evictor.error"),
        }
    }
    info!("cache.evictor.stop");
}
