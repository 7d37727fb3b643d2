use serde::Deserialize;
use std::time::Duration;

/// Backend call settings. The timeout covers the whole request/response
/// cycle against one backend, independent of any lock wait.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendSettings {
    pub timeout_secs: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        BackendSettings { timeout_secs: 30 }
    }
}

impl BackendSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Response cache settings
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    /// TTL applied when neither the backend nor the endpoint supplies one
    pub default_ttl_secs: u64,
    /// Content types eligible for caching; compared against the media type
    /// only, parameters ignored
    pub cacheable_content_types: Vec<String>,
    /// Capacity of the in-memory store
    pub max_entries: u64,
    pub lock: LockSettings,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            default_ttl_secs: 60,
            cacheable_content_types: vec![
                "application/json".to_string(),
                "text/plain".to_string(),
                "text/xml".to_string(),
            ],
            max_entries: 10_000,
            lock: LockSettings::default(),
        }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn is_cacheable_content_type(&self, content_type: &str) -> bool {
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim();
        self.cacheable_content_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(media_type))
    }
}

/// Distributed lock settings for stampede protection
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct LockSettings {
    /// Maximum time a lock is held before automatic expiry, bounding the
    /// damage of a crashed holder
    pub lease_ttl_secs: u64,
    /// Maximum time a caller waits to acquire before degrading to an
    /// uncached backend call
    pub max_wait_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        LockSettings {
            lease_ttl_secs: 30,
            max_wait_secs: 10,
            poll_interval_ms: 200,
        }
    }
}

impl LockSettings {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
