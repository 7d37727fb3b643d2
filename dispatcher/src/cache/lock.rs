//! Distributed lock with bounded acquisition wait.
//!
//! One lease per key, held for at most the lease TTL so a crashed holder
//! cannot wedge a key forever. Acquisition polls until `max_wait` elapses;
//! callers that time out proceed without the lock (the cache engine degrades
//! to an uncached backend call).

use crate::config::LockSettings;
use crate::errors::GatewayError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Pluggable lock backend: a single compare-and-set style lease per key.
/// Tokens make release safe after lease expiry; a holder can only release
/// its own lease.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Takes the lease for `key` if it is free or expired. Returns `false`
    /// when another holder owns an unexpired lease.
    async fn try_lock(&self, key: &str, token: &str, lease: Duration)
    -> Result<bool, GatewayError>;

    /// Releases the lease if `token` still owns it; a no-op otherwise.
    async fn unlock(&self, key: &str, token: &str) -> Result<(), GatewayError>;
}

struct Lease {
    token: String,
    expires_at: Instant,
}

/// In-process lock backend
#[derive(Default)]
pub struct InMemoryLockBackend {
    leases: Mutex<HashMap<String, Lease>>,
}

impl InMemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockBackend for InMemoryLockBackend {
    async fn try_lock(
        &self,
        key: &str,
        token: &str,
        lease: Duration,
    ) -> Result<bool, GatewayError> {
        let mut leases = self.leases.lock();
        match leases.get(key) {
            Some(existing) if existing.expires_at > Instant::now() => Ok(false),
            _ => {
                leases.insert(
                    key.to_string(),
                    Lease {
                        token: token.to_string(),
                        expires_at: Instant::now() + lease,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<(), GatewayError> {
        let mut leases = self.leases.lock();
        if leases.get(key).is_some_and(|lease| lease.token == token) {
            leases.remove(key);
        }
        Ok(())
    }
}

/// An exclusively held lease. Released exactly once: explicitly via
/// [`LockGuard::release`] on the normal paths, or by the `Drop` safety net
/// if the holding future is torn down early.
pub struct LockGuard {
    backend: Arc<dyn LockBackend>,
    key: String,
    token: String,
    released: bool,
}

impl LockGuard {
    pub async fn release(mut self) {
        self.released = true;
        if let Err(e) = self.backend.unlock(&self.key, &self.token).await {
            tracing::warn!(key = %self.key, error = %e, "Failed to release lock");
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let backend = self.backend.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = backend.unlock(&key, &token).await;
            });
        }
    }
}

/// Bounded-wait acquisition over a [`LockBackend`]
#[derive(Clone)]
pub struct DistributedLock {
    backend: Arc<dyn LockBackend>,
    settings: LockSettings,
}

impl DistributedLock {
    pub fn new(backend: Arc<dyn LockBackend>, settings: LockSettings) -> Self {
        DistributedLock { backend, settings }
    }

    /// Polls for the lease until it is acquired or `max_wait` elapses.
    /// `Ok(None)` means the caller should proceed without the lock.
    pub async fn try_acquire(&self, key: &str) -> Result<Option<LockGuard>, GatewayError> {
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + self.settings.max_wait();

        loop {
            if self
                .backend
                .try_lock(key, &token, self.settings.lease_ttl())
                .await?
            {
                return Ok(Some(LockGuard {
                    backend: self.backend.clone(),
                    key: key.to_string(),
                    token,
                    released: false,
                }));
            }

            if Instant::now() + self.settings.poll_interval() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.settings.poll_interval()).await;
        }
    }
}
