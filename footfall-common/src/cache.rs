//! Durable TTL cache
//!
//! Namespaced whole-payload storage in the `cache_entries` table. An entry is
//! a hit while `now - written_at < ttl`; after that it reads as absent even
//! though the row stays on disk until the next write replaces it.
//!
//! The cache is an ordinary value built at startup and handed to whoever
//! needs it. Clones share the same pool.

use crate::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{debug, warn};

/// Handle to the cache table
#[derive(Debug, Clone)]
pub struct TtlCache {
    pool: SqlitePool,
}

impl TtlCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Bind a namespace and its ttl
    pub fn namespace(&self, name: impl Into<String>, ttl: Duration) -> CacheNamespace {
        CacheNamespace {
            cache: self.clone(),
            name: name.into(),
            ttl,
        }
    }

    /// Read `namespace` as of `now`; `None` on miss or expiry
    pub async fn read_at<T: DeserializeOwned>(
        &self,
        namespace: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<T>> {
        let row: Option<(String, i64)> = sqlx::query_as(
            "SELECT payload, written_at_ms FROM cache_entries WHERE namespace = ?",
        )
        .bind(namespace)
        .fetch_optional(&self.pool)
        .await?;

        let Some((payload, written_at_ms)) = row else {
            debug!(namespace, "cache miss (no entry)");
            return Ok(None);
        };

        let Some(written_at) = Utc.timestamp_millis_opt(written_at_ms).single() else {
            warn!(namespace, written_at_ms, "cache entry has invalid timestamp, treating as miss");
            return Ok(None);
        };

        let age = now.signed_duration_since(written_at);
        // ttls beyond chrono's range never expire in practice
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        if age >= ttl {
            debug!(namespace, age_secs = age.num_seconds(), "cache miss (expired)");
            return Ok(None);
        }

        match serde_json::from_str(&payload) {
            Ok(value) => {
                debug!(namespace, age_secs = age.num_seconds(), "cache hit");
                Ok(Some(value))
            }
            Err(e) => {
                warn!(namespace, "cache payload failed to deserialize, treating as miss: {}", e);
                Ok(None)
            }
        }
    }

    /// Replace the payload of `namespace`, stamped with `now`
    pub async fn write_at<T: Serialize + ?Sized>(
        &self,
        namespace: &str,
        payload: &T,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let payload = serde_json::to_string(payload)?;

        sqlx::query(
            "INSERT INTO cache_entries (namespace, payload, written_at_ms) VALUES (?, ?, ?)
             ON CONFLICT(namespace) DO UPDATE SET
                payload = excluded.payload,
                written_at_ms = excluded.written_at_ms",
        )
        .bind(namespace)
        .bind(payload)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        debug!(namespace, "cache write");
        Ok(())
    }
}

/// A namespace bound to its ttl
#[derive(Debug, Clone)]
pub struct CacheNamespace {
    cache: TtlCache,
    name: String,
    ttl: Duration,
}

impl CacheNamespace {
    pub async fn read<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.read_at(Utc::now()).await
    }

    pub async fn read_at<T: DeserializeOwned>(&self, now: DateTime<Utc>) -> Result<Option<T>> {
        self.cache.read_at(&self.name, self.ttl, now).await
    }

    pub async fn write<T: Serialize + ?Sized>(&self, payload: &T) -> Result<()> {
        self.write_at(payload, Utc::now()).await
    }

    pub async fn write_at<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.cache.write_at(&self.name, payload, now).await
    }
}
