use crate::store::BackingStore;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Distributed lock settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LockConfig {
    /// Expiry of a held lock; only matters when a holder dies.
    pub ttl: Duration,
    /// Contended attempts before falling back to an unlocked fetch.
    pub max_retries: u32,
    /// Base pause between attempts. Each pause adds up to half of it as jitter.
    pub backoff: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10),
            max_retries: 5,
            backoff: Duration::from_millis(25),
        }
    }
}

impl LockConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Proof of a held lock. Release it with [`DistributedLock::release`], or hand
/// it to a [`LockGuard`] when the holder may be cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    key: String,
    token: String,
}

impl LockToken {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Cross-process mutual exclusion over set-if-absent plus compare-and-delete.
pub struct DistributedLock {
    store: Arc<dyn BackingStore>,
    config: LockConfig,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn BackingStore>, config: LockConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Lock key guarding `resource`.
    pub fn lock_key(resource: &str) -> String {
        format!("lock:{}", resource)
    }

    /// One acquisition attempt. `Ok(None)` means somebody else holds the lock.
    pub async fn try_acquire(&self, resource: &str) -> Result<Option<LockToken>> {
        let key = Self::lock_key(resource);
        let token = uuid::Uuid::new_v4().to_string();
        if self
            .store
            .set_if_absent(&key, token.as_bytes(), self.config.ttl)
            .await?
        {
            debug!(lock = %key, "lock acquired");
            Ok(Some(LockToken { key, token }))
        } else {
            Ok(None)
        }
    }

    /// Release a held lock. Returns `false` if it had already expired or changed hands.
    pub async fn release(&self, token: &LockToken) -> Result<bool> {
        let released = self
            .store
            .delete_if_equals(&token.key, token.token.as_bytes())
            .await?;
        if !released {
            debug!(lock = %token.key, "lock expired before release");
        }
        Ok(released)
    }

    /// Tie `token` to a guard that releases it even if the holder is dropped mid-work.
    pub fn guard(&self, token: LockToken) -> LockGuard {
        LockGuard {
            store: Arc::clone(&self.store),
            token: Some(token),
        }
    }

    /// Pause before the next attempt: grows linearly for the first few attempts, plus jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.backoff.as_millis() as u64;
        let step = base.saturating_mul(u64::from(attempt.min(3)) + 1);
        let jitter = if base >= 2 { fastrand::u64(0..base / 2) } else { 0 };
        Duration::from_millis(step + jitter)
    }
}

/// Held lock that releases itself when dropped without [`LockGuard::release`].
///
/// The drop path spawns the compare-and-delete on the current runtime; outside
/// a runtime the lock is left to expire with its TTL.
pub struct LockGuard {
    store: Arc<dyn BackingStore>,
    token: Option<LockToken>,
}

impl LockGuard {
    pub fn key(&self) -> Option<&str> {
        self.token.as_ref().map(LockToken::key)
    }

    /// Release now. Returns `false` if the lock had already expired or changed hands.
    pub async fn release(mut self) -> Result<bool> {
        let Some(token) = self.token.take() else {
            return Ok(false);
        };
        let released = self
            .store
            .delete_if_equals(&token.key, token.token.as_bytes())
            .await?;
        if !released {
            debug!(lock = %token.key, "lock expired before release");
        }
        Ok(released)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(lock = %token.key, "no runtime to release abandoned lock, leaving it to expire");
            return;
        };
        let store = Arc::clone(&self.store);
        handle.spawn(async move {
            match store.delete_if_equals(&token.key, token.token.as_bytes()).await {
                Ok(_) => debug!(lock = %token.key, "abandoned lock released"),
                Err(e) => warn!(lock = %token.key, "failed to release abandoned lock: {}", e),
            }
        });
    }
}
