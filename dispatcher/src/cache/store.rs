use crate::errors::GatewayError;
use crate::metrics_defs::{CACHE_HIT, CACHE_MISS};
use async_trait::async_trait;
use http::HeaderMap;
use hyper::StatusCode;
use hyper::body::Bytes;
use moka::sync::Cache;
use shared::counter;
use std::time::{Duration, Instant};

/// A memoized backend response. Immutable once written; a write with the
/// same key overwrites.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub body: Bytes,
    pub headers: HeaderMap,
    pub status: StatusCode,
    /// Expiry relative to write time, consumed by the store
    pub ttl: Duration,
}

/// Pluggable cache backend. Errors are surfaced so the engine can degrade
/// to treat-as-miss; caching is best-effort, never a correctness
/// requirement.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, GatewayError>;
    async fn set(&self, key: &str, entry: CacheEntry) -> Result<(), GatewayError>;
}

struct EntryTtl;

impl moka::Expiry<String, CacheEntry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// In-process cache store with per-entry TTL expiry
pub struct InMemoryCacheStore {
    cache: Cache<String, CacheEntry>,
}

impl InMemoryCacheStore {
    pub fn new(max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(EntryTtl)
            .build();
        InMemoryCacheStore { cache }
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, GatewayError> {
        let entry = self.cache.get(key);
        let metric_def = if entry.is_some() { CACHE_HIT } else { CACHE_MISS };
        counter!(metric_def).increment(1);
        Ok(entry)
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<(), GatewayError> {
        self.cache.insert(key.to_string(), entry);
        Ok(())
    }
}
