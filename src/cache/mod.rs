//! Reference-data side cache
//!
//! Best-effort cache in front of reference data (configurations,
//! demographics, warfare patterns). Operations never fail the request: a
//! backing-store outage reads as a miss and writes are dropped silently.
//! The engine is correct with [`NoopCache`] wired in.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Never-fail cache contract. `get` misses instead of erroring; `set`
/// and `delete` are fire-and-forget.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<serde_json::Value>;
    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration);
    async fn delete(&self, key: &str);
}

/// Cache that stores nothing. Used when `CACHE_URL` is unset and in tests
/// that exercise the degraded path.
#[derive(Debug, Default)]
pub struct NoopCache;

#[async_trait]
impl Cache for NoopCache {
    async fn get(&self, _key: &str) -> Option<serde_json::Value> {
        None
    }
    async fn set(&self, _key: &str, _value: serde_json::Value, _ttl: Duration) {}
    async fn delete(&self, _key: &str) {}
}

/// In-process TTL cache. Entries expire lazily on read.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (serde_json::Value, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => Some(value.clone()),
            _ => None,
        }
    }

    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
    }

    async fn delete(&self, key: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_cache_round_trips() {
        let cache = MemoryCache::new();
        cache
            .set("a", serde_json::json!({"x": 1}), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get("a").await, Some(serde_json::json!({"x": 1})));
        cache.delete("a").await;
        assert_eq!(cache.get("a").await, None);
    }

    #[tokio::test]
    async fn expired_entries_read_as_misses() {
        let cache = MemoryCache::new();
        cache
            .set("a", serde_json::json!(1), Duration::from_millis(0))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cache.get("a").await, None);
    }

    #[tokio::test]
    async fn noop_cache_always_misses() {
        let cache = NoopCache;
        cache
            .set("a", serde_json::json!(1), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get("a").await, None);
    }
}
