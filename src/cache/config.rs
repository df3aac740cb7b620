//! Per-namespace cache configuration.

use crate::guard::LockConfig;
use crate::invalidation::AdaptiveTtlConfig;
use crate::{Error, ErrorContext, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How reads and writes of a namespace involve the source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CachePattern {
    /// Caller fetches on miss (`get_or_fetch`).
    #[default]
    CacheAside,
    /// Source first, then cache; both must succeed.
    WriteThrough,
    /// Cache now, source later from a retrying queue.
    WriteBehind,
    /// The manager loads misses from its own [`DataSource`](super::DataSource).
    ReadThrough,
    /// Like read-through, and hits near expiry trigger a background refresh.
    RefreshAhead,
}

impl CachePattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            CachePattern::CacheAside => "cache-aside",
            CachePattern::WriteThrough => "write-through",
            CachePattern::WriteBehind => "write-behind",
            CachePattern::ReadThrough => "read-through",
            CachePattern::RefreshAhead => "refresh-ahead",
        }
    }

    /// Patterns that cannot work without a registered data source.
    pub fn requires_source(&self) -> bool {
        matches!(
            self,
            CachePattern::WriteThrough | CachePattern::WriteBehind | CachePattern::ReadThrough
        )
    }
}

impl fmt::Display for CachePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CachePattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "cache-aside" => Ok(CachePattern::CacheAside),
            "write-through" => Ok(CachePattern::WriteThrough),
            "write-behind" => Ok(CachePattern::WriteBehind),
            "read-through" => Ok(CachePattern::ReadThrough),
            "refresh-ahead" => Ok(CachePattern::RefreshAhead),
            _ => Err(Error::configuration_with_context(
                format!("unknown cache pattern '{}'", s),
                ErrorContext::new().with_field_path("pattern").with_details(
                    "expected one of cache-aside, write-through, write-behind, read-through, refresh-ahead",
                ),
            )),
        }
    }
}

/// Write-behind queue and retry settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteBehindConfig {
    /// Retries after the first failed source write.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Pending writes held before `set` waits for room.
    pub queue_capacity: usize,
}

impl Default for WriteBehindConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            queue_capacity: 1024,
        }
    }
}

impl WriteBehindConfig {
    /// `base * 2^attempt`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let cap = self.max_delay.as_millis() as u64;
        let delay = base.saturating_mul(1u64 << attempt.min(32));
        Duration::from_millis(delay.min(cap))
    }
}

/// Everything that varies between cache namespaces. Validated once, when the
/// manager is built.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceConfig {
    pub name: String,
    pub ttl: Duration,
    pub pattern: CachePattern,
    /// Refresh-ahead triggers below this share of the TTL recorded at write time.
    pub refresh_ahead_fraction: f64,
    /// Probabilistic early expiration with this `beta`, when set.
    pub early_expiration: Option<f64>,
    pub adaptive_ttl: Option<AdaptiveTtlConfig>,
    /// Store entries under `{ns}:{key}:v{version}`.
    pub versioned: bool,
    /// Bound on a single source fetch.
    pub fetch_timeout: Option<Duration>,
    pub lock: LockConfig,
    pub write_behind: WriteBehindConfig,
}

impl NamespaceConfig {
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            ttl,
            pattern: CachePattern::CacheAside,
            refresh_ahead_fraction: 0.2,
            early_expiration: None,
            adaptive_ttl: None,
            versioned: false,
            fetch_timeout: None,
            lock: LockConfig::default(),
            write_behind: WriteBehindConfig::default(),
        }
    }

    pub fn with_pattern(mut self, pattern: CachePattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_refresh_ahead_fraction(mut self, fraction: f64) -> Self {
        self.refresh_ahead_fraction = fraction;
        self
    }

    /// Enable probabilistic early expiration. `1.0` is the usual choice.
    pub fn with_early_expiration(mut self, beta: f64) -> Self {
        self.early_expiration = Some(beta);
        self
    }

    pub fn with_adaptive_ttl(mut self, adaptive: AdaptiveTtlConfig) -> Self {
        self.adaptive_ttl = Some(adaptive);
        self
    }

    pub fn versioned(mut self) -> Self {
        self.versioned = true;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_write_behind(mut self, write_behind: WriteBehindConfig) -> Self {
        self.write_behind = write_behind;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let field = |name: &str| format!("namespaces.{}.{}", self.name, name);

        if self.name.trim().is_empty() {
            return Err(Error::invalid_field("namespace.name", "namespace name must not be empty"));
        }
        if self.ttl.is_zero() {
            return Err(Error::invalid_field(field("ttl"), "ttl must be positive"));
        }
        if !(0.0..1.0).contains(&self.refresh_ahead_fraction) {
            return Err(Error::configuration_with_context(
                "refresh_ahead_fraction out of range",
                ErrorContext::new()
                    .with_field_path(field("refresh_ahead_fraction"))
                    .with_details(format!("expected [0, 1), got {}", self.refresh_ahead_fraction)),
            ));
        }
        if let Some(beta) = self.early_expiration {
            if !beta.is_finite() || beta <= 0.0 {
                return Err(Error::invalid_field(
                    field("early_expiration"),
                    format!("beta must be a positive number, got {}", beta),
                ));
            }
        }
        if let Some(adaptive) = &self.adaptive_ttl {
            if adaptive.min_ttl.is_zero() || adaptive.min_ttl > adaptive.max_ttl {
                return Err(Error::invalid_field(
                    field("adaptive_ttl"),
                    "adaptive ttl bounds must satisfy 0 < min <= max",
                ));
            }
            if adaptive.capacity == 0 {
                return Err(Error::invalid_field(
                    field("adaptive_ttl.capacity"),
                    "capacity must be positive",
                ));
            }
        }
        if self.fetch_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::invalid_field(field("fetch_timeout"), "fetch timeout must be positive"));
        }
        if self.lock.ttl.is_zero() {
            return Err(Error::invalid_field(field("lock.ttl"), "lock ttl must be positive"));
        }
        let wb = &self.write_behind;
        if wb.queue_capacity == 0 {
            return Err(Error::invalid_field(
                field("write_behind.queue_capacity"),
                "queue capacity must be positive",
            ));
        }
        if wb.base_delay > wb.max_delay {
            return Err(Error::invalid_field(
                field("write_behind.base_delay"),
                "base delay must not exceed max delay",
            ));
        }
        Ok(())
    }
}
