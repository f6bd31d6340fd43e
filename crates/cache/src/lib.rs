//! Redis-backed cache shared by the intent extractor (C2), embedding
//! service (C3), hybrid retriever (C7), LLM judge reason cache (C9), and
//! user profile service (C12). Keys are derived from SHA-256 digests of
//! their semantic inputs so callers never hand-build key strings.

use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis connection error: {0}")]
    Connection(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// TTLs named throughout §4: intent cache (6h), search result cache
/// (~45s), user profile cache (1h), preference vector (90d), interpretable
/// profile (30d).
pub mod ttl {
    pub const INTENT_SECONDS: u64 = 6 * 3600;
    pub const SEARCH_RESULT_SECONDS: u64 = 45;
    pub const EMBEDDING_SECONDS: u64 = 30 * 24 * 3600;
    pub const PROFILE_SECONDS: u64 = 3600;
    pub const PREFERENCE_VECTOR_SECONDS: u64 = 90 * 24 * 3600;
    pub const INTERPRETABLE_PROFILE_SECONDS: u64 = 30 * 24 * 3600;
    pub const JUDGE_REASON_SECONDS: u64 = 24 * 3600;
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Clone)]
pub struct TasteCache {
    conn: ConnectionManager,
}

impl TasteCache {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    pub fn generate_key(prefix: &str, parts: &[&str]) -> String {
        taste_core::hashing::cache_key(prefix, parts)
    }

    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(s) => {
                debug!(key, "cache hit");
                Ok(Some(serde_json::from_str(&s)?))
            }
            None => {
                debug!(key, "cache miss");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, value))]
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(value)?;
        conn.set_ex::<_, _, ()>(key, payload, ttl_seconds).await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    /// Deletes everything matching `pattern` via SCAN, avoiding KEYS'
    /// O(n) blocking behavior on a large keyspace.
    pub async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut deleted = 0u64;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                conn.del::<_, ()>(&keys).await?;
                deleted += keys.len() as u64;
            }
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(deleted)
    }

    /// Binary-safe get for the 384×4-byte little-endian float layout used
    /// by the user preference vector (§9 design note). Must not UTF-8
    /// decode the payload.
    pub async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let raw: Option<Vec<u8>> = conn.get(key).await?;
        Ok(raw)
    }

    pub async fn set_bytes(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds).await?;
        Ok(())
    }

    /// `SET key 1 NX EX ttl_seconds` — used for the phase-detection and
    /// list-generation exclusivity locks (§5). Returns `true` if this
    /// call acquired the lock, `false` if another holder already has it.
    #[instrument(skip(self))]
    pub async fn acquire_lock(&self, key: &str, ttl_seconds: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await?;
        Ok(acquired.is_some())
    }

    pub async fn release_lock(&self, key: &str) -> Result<()> {
        self.delete(key).await
    }

    pub async fn health_check(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|pong| pong == "PONG")
            .unwrap_or_else(|e| {
                warn!(error = %e, "cache health check failed");
                false
            })
    }

    pub fn ttl_duration(seconds: u64) -> Duration {
        Duration::from_secs(seconds)
    }
}

/// A cached value with its insertion time, used where callers need to
/// know cache age (e.g. the judge's reason cache, §4.9).
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct Timestamped<T> {
    pub value: T,
    pub cached_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_cache() -> Option<TasteCache> {
        match TasteCache::new("redis://127.0.0.1:6379").await {
            Ok(c) => Some(c),
            Err(_) => {
                eprintln!("Skipping test: redis not available");
                None
            }
        }
    }

    #[test]
    fn generate_key_is_deterministic() {
        let a = TasteCache::generate_key("intent", &["prompt", "persona"]);
        let b = TasteCache::generate_key("intent", &["prompt", "persona"]);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let Some(cache) = test_cache().await else {
            return;
        };
        let key = TasteCache::generate_key("test", &["round-trip"]);
        cache.set(&key, &42u32, 10).await.unwrap();
        let value: Option<u32> = cache.get(&key).await.unwrap();
        assert_eq!(value, Some(42));
        cache.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn missing_key_is_none_not_error() {
        let Some(cache) = test_cache().await else {
            return;
        };
        let key = TasteCache::generate_key("test", &["definitely-missing-key"]);
        let value: Option<u32> = cache.get(&key).await.unwrap();
        assert_eq!(value, None);
    }
}
