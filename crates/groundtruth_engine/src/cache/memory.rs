//! In-memory LRU store with per-entry expiry

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use tokio::sync::Mutex;

use groundtruth_common::error::Result;

use super::{CacheEntry, CacheStore};

const DEFAULT_CAPACITY: usize = 10_000;

pub struct MemoryCacheStore {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl MemoryCacheStore {
    /// `capacity` of zero falls back to the default
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .or_else(|| NonZeroUsize::new(DEFAULT_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn upsert(&self, entry: CacheEntry) -> Result<()> {
        self.entries.lock().await.put(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.pop(key);
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(key: &str, expires_at: DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            response: json!({"k": key}),
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let store = MemoryCacheStore::new(2);
        let later = Utc::now() + chrono::Duration::hours(1);
        store.upsert(entry("a", later)).await.unwrap();
        store.upsert(entry("b", later)).await.unwrap();
        store.upsert(entry("c", later)).await.unwrap();

        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.get("b").await.unwrap().is_some());
        assert!(store.get("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let store = MemoryCacheStore::default();
        let now = Utc::now();
        store.upsert(entry("old", now - chrono::Duration::seconds(1))).await.unwrap();
        store.upsert(entry("new", now + chrono::Duration::hours(1))).await.unwrap();

        assert_eq!(store.delete_expired(now).await.unwrap(), 1);
        assert_eq!(store.len().await, 1);
    }
}
