//! Stampede-safe cache-aside response store.
//!
//! Successful backend responses for proxied GET requests are memoized
//! behind a pluggable [`CacheStore`]. Concurrent identical requests
//! collapse into a single backend call: the first caller to take the
//! per-key distributed lock recomputes and writes through, waiters either
//! observe the fresh entry on re-check or, if they cannot acquire the lock
//! within `max_wait`, degrade to an uncached backend call so a slow origin
//! never causes unbounded queuing.
//!
//! Cache-layer failures (store or lock backend unavailable) degrade to
//! treat-as-miss; caching is best-effort, never a correctness requirement.

pub mod lock;
pub mod store;

use crate::config::CacheSettings;
use crate::errors::GatewayError;
use crate::metrics_defs::{CACHE_LOCK_TIMEOUTS, CACHE_WRITES};
use http::HeaderMap;
use http::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use hyper::StatusCode;
use hyper::body::Bytes;
use lock::DistributedLock;
use sha2::{Digest, Sha256};
use shared::counter;
use std::sync::Arc;
use std::time::Duration;
use store::{CacheEntry, CacheStore};

/// What the engine hands back to the dispatch layer, and what `recompute`
/// closures produce (post-URL-rewrite).
#[derive(Clone, Debug)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl From<CacheEntry> for CachedResponse {
    fn from(entry: CacheEntry) -> Self {
        CachedResponse {
            status: entry.status,
            headers: entry.headers,
            body: entry.body,
        }
    }
}

impl CachedResponse {
    fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}

/// Derives the deterministic cache key for a proxied GET. Credentials are
/// hashed so distinct callers get distinct entries without the key ever
/// holding the raw Authorization value.
///
/// Every component is length-prefixed. Path, query, and header values are
/// caller-controlled and may contain the separator themselves; the prefix
/// keeps the mapping injective so no two distinct requests share a key.
pub fn build_cache_key(
    environment: &str,
    endpoint: &str,
    sub_path: &str,
    query: Option<&str>,
    headers: &HeaderMap,
) -> String {
    use std::fmt::Write;

    let auth_hash = match headers.get(AUTHORIZATION) {
        Some(value) => {
            let digest = Sha256::digest(value.as_bytes());
            digest.iter().fold(String::with_capacity(64), |mut s, b| {
                let _ = write!(s, "{b:02x}");
                s
            })
        }
        None => "anonymous".to_string(),
    };
    let accept_language = headers
        .get(http::header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let components = [
        environment,
        endpoint,
        sub_path,
        query.unwrap_or(""),
        auth_hash.as_str(),
        accept_language,
    ];
    let mut key = String::new();
    for component in components {
        let _ = write!(key, "{}:{component}:", component.len());
    }
    key
}

/// Combines the cache store, the distributed lock, and a caller-supplied
/// recompute closure into the stampede-safe cache-aside protocol.
pub struct ResponseCacheEngine {
    store: Arc<dyn CacheStore>,
    lock: DistributedLock,
    settings: CacheSettings,
}

impl ResponseCacheEngine {
    pub fn new(store: Arc<dyn CacheStore>, lock: DistributedLock, settings: CacheSettings) -> Self {
        ResponseCacheEngine {
            store,
            lock,
            settings,
        }
    }

    /// Runs the per-request state machine: lookup, lock, re-check,
    /// recompute-once, write-through, release.
    ///
    /// `recompute` performs the real backend call (and URL rewriting) and is
    /// invoked at most once per caller. The lock guarantees at most one
    /// concurrent backend invocation per key among callers that hold it;
    /// callers that time out waiting pay for an uncached call instead of
    /// queuing indefinitely.
    pub async fn handle_cacheable_get<F, Fut>(
        &self,
        cache_key: &str,
        lock_key: &str,
        endpoint_ttl: Option<Duration>,
        recompute: F,
    ) -> Result<CachedResponse, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedResponse, GatewayError>>,
    {
        // Fast path: no lock involved
        if let Some(entry) = self.lookup(cache_key).await {
            return Ok(entry.into());
        }

        let guard = match self.lock.try_acquire(lock_key).await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                counter!(CACHE_LOCK_TIMEOUTS).increment(1);
                tracing::debug!(key = %cache_key, "Lock wait timed out, recomputing uncached");
                return recompute().await;
            }
            Err(e) => {
                tracing::warn!(key = %cache_key, error = %e, "Lock backend error, recomputing uncached");
                return recompute().await;
            }
        };

        // Another holder may have populated the entry while we waited
        if let Some(entry) = self.lookup(cache_key).await {
            guard.release().await;
            return Ok(entry.into());
        }

        let result = recompute().await;

        if let Ok(response) = &result {
            self.write_through(cache_key, response, endpoint_ttl).await;
        }
        guard.release().await;
        result
    }

    async fn lookup(&self, cache_key: &str) -> Option<CacheEntry> {
        match self.store.get(cache_key).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key = %cache_key, error = %e, "Cache store read failed, treating as miss");
                None
            }
        }
    }

    async fn write_through(
        &self,
        cache_key: &str,
        response: &CachedResponse,
        endpoint_ttl: Option<Duration>,
    ) {
        if !response.status.is_success() {
            return;
        }
        let cacheable = response
            .content_type()
            .is_some_and(|ct| self.settings.is_cacheable_content_type(ct));
        if !cacheable {
            return;
        }

        let ttl = self.select_ttl(&response.headers, endpoint_ttl);
        let entry = CacheEntry {
            body: response.body.clone(),
            headers: response.headers.clone(),
            status: response.status,
            ttl,
        };

        match self.store.set(cache_key, entry).await {
            Ok(()) => {
                counter!(CACHE_WRITES).increment(1);
            }
            Err(e) => {
                tracing::warn!(key = %cache_key, error = %e, "Cache store write failed");
            }
        }
    }

    /// TTL priority: backend `Cache-Control: max-age`, else the endpoint's
    /// configured duration, else the global default.
    fn select_ttl(&self, headers: &HeaderMap, endpoint_ttl: Option<Duration>) -> Duration {
        max_age(headers)
            .or(endpoint_ttl)
            .unwrap_or_else(|| self.settings.default_ttl())
    }
}

fn max_age(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(CACHE_CONTROL)?.to_str().ok()?;
    value
        .split(',')
        .map(str::trim)
        .find_map(|directive| directive.strip_prefix("max-age="))
        .and_then(|secs| secs.parse::<u64>().ok())
        .map(Duration::from_secs)
}
