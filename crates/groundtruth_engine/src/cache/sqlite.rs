//! SQLite-backed durable cache store
//!
//! Schema:
//! - response_cache: key (primary), response JSON text, expires_at (unix millis)

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use groundtruth_common::error::{GroundTruthError, Result};

use super::{CacheEntry, CacheStore};

fn db_err(e: rusqlite::Error) -> GroundTruthError {
    GroundTruthError::Cache(e.to_string())
}

pub struct SqliteCacheStore {
    conn: Mutex<Connection>,
}

impl SqliteCacheStore {
    /// Open or create the cache database
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").map_err(db_err)?;
        Self::init(conn)
    }

    /// Throwaway store for tests
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(db_err)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS response_cache (
                key TEXT PRIMARY KEY,
                response TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cache_expires ON response_cache(expires_at);
            "#,
        )
        .map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        f(&conn)
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let row: Option<(String, i64)> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT response, expires_at FROM response_cache WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)
        })?;

        let Some((response, expires_ms)) = row else {
            return Ok(None);
        };
        let expires_at = Utc
            .timestamp_millis_opt(expires_ms)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Ok(Some(CacheEntry {
            key: key.to_string(),
            response: serde_json::from_str(&response)?,
            expires_at,
        }))
    }

    async fn upsert(&self, entry: CacheEntry) -> Result<()> {
        let response = serde_json::to_string(&entry.response)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO response_cache (key, response, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET response = excluded.response, expires_at = excluded.expires_at",
                params![entry.key, response, entry.expires_at.timestamp_millis()],
            )
            .map(|_| ())
            .map_err(db_err)
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM response_cache WHERE key = ?1", params![key])
                .map(|_| ())
                .map_err(db_err)
        })
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM response_cache WHERE expires_at <= ?1",
                params![now.timestamp_millis()],
            )
            .map_err(db_err)
        })
    }
}
