//! In-memory cache implementation using moka

use anyhow::{Context, Result};
use moka::future::Cache;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_MAX_CAPACITY: u64 = 10_000;
const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// JSON-serialized cache value
#[derive(Clone)]
struct CacheEntry {
    data: Arc<String>,
}

impl CacheEntry {
    fn new<T: Serialize>(value: &T) -> Result<Self> {
        let json = serde_json::to_string(value).context("Failed to serialize cache value")?;
        Ok(Self {
            data: Arc::new(json),
        })
    }

    fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.data).context("Failed to deserialize cache value")
    }
}

/// Thread-safe cache with one TTL for every entry
pub struct MemoryCache {
    cache: Cache<String, CacheEntry>,
    default_ttl: Duration,
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entry_count", &self.cache.entry_count())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_capacity_and_ttl(DEFAULT_MAX_CAPACITY, DEFAULT_TTL)
    }

    pub fn with_capacity_and_ttl(max_capacity: u64, default_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(default_ttl)
            .support_invalidation_closures()
            .build();

        Self { cache, default_ttl }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// `Ok(None)` when the key is absent or expired
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.cache.get(key).await {
            Some(entry) => Ok(Some(entry.deserialize()?)),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let entry = CacheEntry::new(value)?;
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    pub async fn delete(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    /// Drop every key starting with `prefix`
    pub fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let prefix = prefix.to_string();
        self.cache
            .invalidate_entries_if(move |key, _| key.starts_with(&prefix))
            .map_err(|e| anyhow::anyhow!("Failed to invalidate cache entries: {}", e))?;
        Ok(())
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}
