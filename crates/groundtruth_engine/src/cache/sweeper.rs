//! Periodic expired-entry sweep. Optional: reads already self-expire.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::ResponseCache;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Sweep every `interval` until the returned handle is aborted
pub fn spawn_cache_sweeper(cache: ResponseCache, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
        // First tick fires immediately; skip it
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match cache.cleanup_expired().await {
                Ok(removed) => debug!(removed, "cache sweep complete"),
                Err(e) => warn!("cache sweep failed: {}", e),
            }
        }
    })
}

/// Background sweep tied to a scope; aborted when dropped
pub struct SweeperGuard {
    handle: JoinHandle<()>,
}

impl SweeperGuard {
    pub fn start(cache: ResponseCache, interval: Duration) -> Self {
        debug!(interval_secs = interval.as_secs(), "starting cache sweeper");
        Self {
            handle: spawn_cache_sweeper(cache, interval),
        }
    }
}

impl Drop for SweeperGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    use crate::cache::{CacheStore, MemoryCacheStore, TtlPolicy};

    #[tokio::test]
    async fn test_sweeper_removes_expired_entries() {
        let store = Arc::new(MemoryCacheStore::new(16));
        let cache = ResponseCache::new(store.clone(), TtlPolicy::default());
        cache.cache_response("gt:gone", json!(1), Duration::from_millis(5)).await;

        let handle = spawn_cache_sweeper(cache, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.abort();

        assert!(store.get("gt:gone").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_guard_stops_sweeping_when_dropped() {
        let store = Arc::new(MemoryCacheStore::new(16));
        let cache = ResponseCache::new(store.clone(), TtlPolicy::default());

        let guard = SweeperGuard::start(cache.clone(), Duration::from_millis(20));
        cache.cache_response("gt:first", json!(1), Duration::from_millis(5)).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(store.is_empty().await);

        drop(guard);
        cache.cache_response("gt:second", json!(2), Duration::from_millis(5)).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(store.get("gt:second").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_zero_interval_does_not_panic() {
        let handle = spawn_cache_sweeper(ResponseCache::in_memory(4), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }
}
