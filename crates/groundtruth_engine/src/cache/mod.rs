//! Response cache for engine answers
//!
//! Keys are `gt:<operation>:<arg>:<arg>...` built from normalized
//! arguments, so the same question collides no matter who asks it.
//! Every read checks expiry and purges stale entries; the background
//! sweep only reclaims space.

pub mod memory;
pub mod sqlite;
pub mod sweeper;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use groundtruth_common::config::{CacheBackend, CacheSettings};
use groundtruth_common::error::Result;

pub use memory::MemoryCacheStore;
pub use sqlite::SqliteCacheStore;
pub use sweeper::{spawn_cache_sweeper, SweeperGuard};

const KEY_PREFIX: &str = "gt";

/// Deterministic key from an operation name and its normalized arguments
pub fn cache_key<S: AsRef<str>>(operation: &str, args: &[S]) -> String {
    let mut key = format!("{}:{}", KEY_PREFIX, operation);
    for arg in args {
        key.push(':');
        key.push_str(arg.as_ref().trim());
    }
    key
}

/// One stored response
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub response: Value,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Key-value store behind the cache. Any durable store will do.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Insert or replace by key
    async fn upsert(&self, entry: CacheEntry) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every entry expiring at or before `now`, returning how many
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// How stable an answer is, which decides how long it may be cached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    /// Starting position plus opening roll, same for every user
    Opening,
    /// Analysis of a specific position
    Position,
    /// Ad-hoc move verification
    MoveCheck,
}

#[derive(Debug, Clone, Copy)]
pub struct TtlPolicy {
    pub opening: Duration,
    pub position: Duration,
    pub move_check: Duration,
}

impl TtlPolicy {
    pub fn ttl(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Opening => self.opening,
            TtlClass::Position => self.position,
            TtlClass::MoveCheck => self.move_check,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::from(&CacheSettings::default())
    }
}

impl From<&CacheSettings> for TtlPolicy {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            opening: Duration::from_secs(settings.opening_ttl_secs),
            position: Duration::from_secs(settings.position_ttl_secs),
            move_check: Duration::from_secs(settings.move_ttl_secs),
        }
    }
}

fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Cache front end. Store failures are logged and read as misses;
/// the cache never fails a verification.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    ttl: TtlPolicy,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: TtlPolicy) -> Self {
        Self { store, ttl }
    }

    /// In-memory cache with default TTLs
    pub fn in_memory(capacity: usize) -> Self {
        Self::new(Arc::new(MemoryCacheStore::new(capacity)), TtlPolicy::default())
    }

    /// Build the store the settings ask for
    pub fn from_settings(settings: &CacheSettings) -> Result<Self> {
        let store: Arc<dyn CacheStore> = match settings.backend {
            CacheBackend::Memory => Arc::new(MemoryCacheStore::new(settings.capacity)),
            CacheBackend::Sqlite => {
                Arc::new(SqliteCacheStore::open_at(settings.resolved_sqlite_path())?)
            }
        };
        Ok(Self::new(store, TtlPolicy::from(settings)))
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        self.ttl
    }

    /// Live value for `key`. Expired entries are deleted and never returned.
    pub async fn check_cache(&self, key: &str) -> Option<Value> {
        let entry = match self.store.get(key).await {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(key, "cache read failed: {}", e);
                return None;
            }
        };
        if entry.is_expired(Utc::now()) {
            debug!(key, "cache entry expired");
            if let Err(e) = self.store.delete(key).await {
                warn!(key, "failed to purge expired entry: {}", e);
            }
            return None;
        }
        debug!(key, cached = true, "cache hit");
        Some(entry.response)
    }

    pub async fn cache_response(&self, key: &str, value: Value, ttl: Duration) {
        let entry = CacheEntry {
            key: key.to_string(),
            response: value,
            expires_at: expiry_after(Utc::now(), ttl),
        };
        if let Err(e) = self.store.upsert(entry).await {
            warn!(key, "cache write failed: {}", e);
        }
    }

    /// Store with the TTL of the given stability class
    pub async fn cache_for(&self, key: &str, value: Value, class: TtlClass) {
        self.cache_response(key, value, self.ttl.ttl(class)).await
    }

    /// Remove all expired entries; returns how many were removed
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let removed = self.store.delete_expired(Utc::now()).await?;
        if removed > 0 {
            debug!(removed, "swept expired cache entries");
        }
        Ok(removed)
    }
}
