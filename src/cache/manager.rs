//! Cache manager.

use super::config::{CachePattern, NamespaceConfig};
use super::envelope::Envelope;
use super::source::DataSource;
use super::write_behind::WriteBehindQueue;
use crate::guard::{should_expire_early, should_refresh_ahead, DistributedLock, RequestCoalescer};
use crate::invalidation::{AdaptiveTtl, DependencyGraph, EventRegistry};
use crate::metrics::{noop_metrics, MetricEvent, MetricsSink};
use crate::store::BackingStore;
use crate::{BoxError, Error, ErrorContext, Result, SharedError};
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

pub(crate) type Loader =
    Box<dyn FnOnce() -> BoxFuture<'static, std::result::Result<Option<Value>, BoxError>> + Send>;

/// Result of one source fetch, shared by every coalesced waiter.
#[derive(Clone)]
pub(crate) enum FetchOutcome {
    Value(Arc<Value>),
    Missing,
    Failed(SharedError),
    TimedOut(Duration),
}

impl FetchOutcome {
    fn into_result(self, key: &str) -> Result<Option<Arc<Value>>> {
        match self {
            FetchOutcome::Value(value) => Ok(Some(value)),
            FetchOutcome::Missing => Ok(None),
            FetchOutcome::Failed(source) => Err(Error::SourceFetchFailed {
                key: key.to_string(),
                source,
            }),
            FetchOutcome::TimedOut(timeout) => Err(Error::FetchTimeout {
                key: key.to_string(),
                timeout,
            }),
        }
    }
}

enum Lookup {
    Hit(Envelope),
    Miss,
    Unavailable(Error),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    /// Keys reached by invalidation calls, plus version bumps.
    pub invalidations: u64,
    pub lock_contentions: u64,
    pub store_errors: u64,
    pub refreshes: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
pub(crate) struct AtomicStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub sets: AtomicU64,
    pub invalidations: AtomicU64,
    pub lock_contentions: AtomicU64,
    pub store_errors: AtomicU64,
    pub refreshes: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            lock_contentions: self.lock_contentions.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
        }
    }
}

pub(crate) struct Inner {
    pub config: NamespaceConfig,
    pub store: Arc<dyn BackingStore>,
    pub source: Option<Arc<dyn DataSource>>,
    pub metrics: Arc<dyn MetricsSink>,
    pub lock: DistributedLock,
    pub coalescer: RequestCoalescer<FetchOutcome>,
    pub dependencies: DependencyGraph,
    pub events: EventRegistry,
    pub adaptive: Option<AdaptiveTtl>,
    pub write_behind: Option<WriteBehindQueue>,
    pub stats: AtomicStats,
}

/// Builder for a [`CacheManager`]; validation happens in [`build`](Self::build).
pub struct CacheManagerBuilder {
    store: Arc<dyn BackingStore>,
    config: NamespaceConfig,
    source: Option<Arc<dyn DataSource>>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl CacheManagerBuilder {
    pub fn new(store: Arc<dyn BackingStore>, config: NamespaceConfig) -> Self {
        Self {
            store,
            config,
            source: None,
            metrics: None,
        }
    }

    pub fn source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate the namespace and start its background machinery.
    ///
    /// Write-behind namespaces spawn their worker here and therefore must be
    /// built inside a tokio runtime.
    pub fn build(self) -> Result<CacheManager> {
        let config = self.config;
        config.validate()?;

        if config.pattern.requires_source() && self.source.is_none() {
            return Err(Error::configuration_with_context(
                format!("pattern '{}' requires a data source", config.pattern),
                ErrorContext::new()
                    .with_field_path(format!("namespaces.{}.pattern", config.name))
                    .with_details("register one with CacheManagerBuilder::source"),
            ));
        }

        let metrics = self.metrics.unwrap_or_else(noop_metrics);

        let write_behind = match (&self.source, config.pattern) {
            (Some(source), CachePattern::WriteBehind) => {
                let handle = Handle::try_current().map_err(|e| {
                    Error::configuration_with_context(
                        "write-behind requires a running tokio runtime",
                        ErrorContext::new()
                            .with_field_path(format!("namespaces.{}.pattern", config.name))
                            .with_details(e.to_string()),
                    )
                })?;
                Some(WriteBehindQueue::spawn(
                    &handle,
                    config.name.clone(),
                    Arc::clone(source),
                    config.write_behind.clone(),
                    Arc::clone(&metrics),
                ))
            }
            _ => None,
        };

        info!(
            namespace = %config.name,
            pattern = %config.pattern,
            store = self.store.name(),
            versioned = config.versioned,
            "cache namespace registered"
        );

        Ok(CacheManager {
            inner: Arc::new(Inner {
                lock: DistributedLock::new(Arc::clone(&self.store), config.lock.clone()),
                adaptive: config.adaptive_ttl.clone().map(AdaptiveTtl::new),
                config,
                store: self.store,
                source: self.source,
                metrics,
                coalescer: RequestCoalescer::new(),
                dependencies: DependencyGraph::new(),
                events: EventRegistry::new(),
                write_behind,
                stats: AtomicStats::default(),
            }),
        })
    }
}

/// One cache namespace over a shared backing store.
///
/// Cheap to clone; clones share the coalescing table, dependency graph, event
/// registry and statistics.
#[derive(Clone)]
pub struct CacheManager {
    pub(crate) inner: Arc<Inner>,
}

impl CacheManager {
    pub fn builder(store: Arc<dyn BackingStore>, config: NamespaceConfig) -> CacheManagerBuilder {
        CacheManagerBuilder::new(store, config)
    }

    pub fn namespace(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &NamespaceConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.to_stats()
    }

    /// Cache-aside read: on a miss `fetch` runs (coalesced and locked), its
    /// result is cached and returned.
    ///
    /// Failed or timed out fetches are returned as errors and never cached. If
    /// the backing store is down, `fetch` is called directly and its result
    /// returned uncached.
    pub async fn get_or_fetch<T, F, Fut, E>(&self, key: &str, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let loader: Loader = Box::new(move || {
            async move {
                let value = fetch().await.map_err(Into::<BoxError>::into)?;
                Ok::<_, BoxError>(Some(serde_json::to_value(value)?))
            }
            .boxed()
        });
        match self.read(key, Some(loader)).await? {
            Some(value) => Ok(T::deserialize(&*value)?),
            None => Err(Error::source_fetch(key, "fetch produced no value")),
        }
    }

    /// Read `key`. Namespaces other than cache-aside load misses from their
    /// data source; cache-aside reports a miss as `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let loader = match (&self.inner.source, self.inner.config.pattern) {
            (Some(source), pattern) if pattern != CachePattern::CacheAside => {
                Some(source_loader(Arc::clone(source), key))
            }
            _ => None,
        };
        match self.read(key, loader).await? {
            Some(value) => Ok(Some(T::deserialize(&*value)?)),
            None => Ok(None),
        }
    }

    /// Write `key` according to the namespace pattern.
    ///
    /// - write-through: source first, then cache; either failure is returned
    /// - write-behind: cache now, source write queued
    /// - others: best-effort cache write, store failures are logged only
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        match self.inner.config.pattern {
            CachePattern::WriteThrough => {
                let source = self.require_source()?;
                source
                    .store(key, &value)
                    .await
                    .map_err(|e| Error::SourceWriteFailed {
                        key: key.to_string(),
                        source: Arc::from(e),
                    })?;
                let version = self
                    .resolve_version(key)
                    .await
                    .map_err(|e| self.store_failed(e))?;
                let skey = self.storage_key(key, version);
                self.write_entry(key, &skey, version, value)
                    .await
                    .map_err(|e| self.store_failed(e))
            }
            CachePattern::WriteBehind => {
                self.write_best_effort(key, value.clone()).await;
                match &self.inner.write_behind {
                    Some(queue) => queue.enqueue(key.to_string(), value).await,
                    None => Err(self.missing_source()),
                }
            }
            _ => {
                self.write_best_effort(key, value).await;
                Ok(())
            }
        }
    }

    /// [`set`](Self::set), registering `key` as a dependent of each of `dependencies`.
    pub async fn set_with_dependencies<T, I, S>(
        &self,
        key: &str,
        value: &T,
        dependencies: I,
    ) -> Result<()>
    where
        T: Serialize + ?Sized,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.inner.dependencies.add(key, dependencies);
        self.set(key, value).await
    }

    /// Wait for queued write-behind writes. Returns at once for other patterns.
    pub async fn flush_writes(&self) {
        if let Some(queue) = &self.inner.write_behind {
            queue.flush().await;
        }
    }

    pub fn pending_writes(&self) -> usize {
        self.inner
            .write_behind
            .as_ref()
            .map_or(0, WriteBehindQueue::pending)
    }

    async fn read(&self, key: &str, loader: Option<Loader>) -> Result<Option<Arc<Value>>> {
        let version = match self.resolve_version(key).await {
            Ok(version) => version,
            Err(e) => return self.degrade(key, loader, e).await,
        };
        let skey = self.storage_key(key, version);

        match self.lookup(&skey, version).await {
            Lookup::Hit(envelope) => {
                self.note_hit(key);
                let written_ttl = envelope.ttl();
                let value = Arc::new(envelope.value);
                if let Some(loader) = loader {
                    self.maybe_refresh(key, &skey, version, written_ttl, loader)
                        .await;
                }
                Ok(Some(value))
            }
            Lookup::Miss => {
                self.note_miss(key);
                match loader {
                    Some(loader) => self.fetch_coalesced(key, skey, version, loader, false).await,
                    None => Ok(None),
                }
            }
            Lookup::Unavailable(e) => self.degrade(key, loader, e).await,
        }
    }

    async fn degrade(
        &self,
        key: &str,
        loader: Option<Loader>,
        error: Error,
    ) -> Result<Option<Arc<Value>>> {
        self.note_store_error(&error);
        warn!(
            namespace = %self.namespace(),
            key,
            "backing store unavailable, reading from source uncached: {}",
            error
        );
        match loader {
            Some(loader) => self.run_loader(key, loader).await.into_result(key),
            None => Ok(None),
        }
    }

    async fn lookup(&self, skey: &str, version: Option<u64>) -> Lookup {
        match self.inner.store.get(skey).await {
            Ok(Some(bytes)) => match Envelope::decode(&bytes) {
                Ok(envelope) if envelope.is_current(version) => Lookup::Hit(envelope),
                Ok(_) => {
                    debug!(namespace = %self.namespace(), key = skey, "entry written under an older version");
                    Lookup::Miss
                }
                Err(e) => {
                    warn!(namespace = %self.namespace(), key = skey, "undecodable cache entry, treating as miss: {}", e);
                    Lookup::Miss
                }
            },
            Ok(None) => Lookup::Miss,
            Err(e) => Lookup::Unavailable(e),
        }
    }

    /// Lookup without statistics, used while holding or waiting for the lock.
    async fn peek(&self, skey: &str, version: Option<u64>) -> Option<Arc<Value>> {
        match self.lookup(skey, version).await {
            Lookup::Hit(envelope) => Some(Arc::new(envelope.value)),
            _ => None,
        }
    }

    async fn fetch_coalesced(
        &self,
        key: &str,
        skey: String,
        version: Option<u64>,
        loader: Loader,
        force: bool,
    ) -> Result<Option<Arc<Value>>> {
        let coalesce_key = if force {
            format!("refresh:{}", skey)
        } else {
            skey.clone()
        };
        let leader = self.clone();
        let owned_key = key.to_string();
        self.inner
            .coalescer
            .run(&coalesce_key, move || {
                leader.lead(owned_key, skey, version, loader, force).boxed()
            })
            .await
            .into_result(key)
    }

    /// The single fetch behind a coalesced miss: lock, double-check, fetch, store, unlock.
    ///
    /// Runs inside the coalesced future, which is dropped once every waiter is gone;
    /// the lock guard then releases the lock from its drop.
    async fn lead(
        self,
        key: String,
        skey: String,
        version: Option<u64>,
        loader: Loader,
        force: bool,
    ) -> FetchOutcome {
        let max_retries = self.inner.lock.config().max_retries;
        let mut attempt = 0u32;
        loop {
            match self.inner.lock.try_acquire(&skey).await {
                Ok(Some(token)) => {
                    let guard = self.inner.lock.guard(token);
                    let cached = if force {
                        None
                    } else {
                        self.peek(&skey, version).await
                    };
                    let outcome = match cached {
                        Some(value) => FetchOutcome::Value(value),
                        None => self.load_and_store(&key, &skey, version, loader).await,
                    };
                    if let Err(e) = guard.release().await {
                        warn!(namespace = %self.namespace(), key = %key, "failed to release lock: {}", e);
                    }
                    return outcome;
                }
                Ok(None) => {
                    self.inner
                        .stats
                        .lock_contentions
                        .fetch_add(1, Ordering::Relaxed);
                    self.record(MetricEvent::LockContention);
                    if force {
                        debug!(namespace = %self.namespace(), key = %key, "refresh already running elsewhere");
                        return FetchOutcome::Missing;
                    }
                    if attempt >= max_retries {
                        break;
                    }
                    let delay = self.inner.lock.backoff(attempt);
                    debug!(
                        namespace = %self.namespace(),
                        key = %key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "lock contended, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    if let Some(value) = self.peek(&skey, version).await {
                        return FetchOutcome::Value(value);
                    }
                }
                Err(e) => {
                    self.note_store_error(&e);
                    warn!(namespace = %self.namespace(), key = %key, "lock unavailable, fetching uncached: {}", e);
                    return self.run_loader(&key, loader).await;
                }
            }
        }

        let exhausted = Error::LockAcquisitionExhausted {
            key: key.clone(),
            attempts: attempt + 1,
        };
        warn!(namespace = %self.namespace(), "{}, fetching without the lock", exhausted);
        self.record(MetricEvent::LockExhausted);
        self.load_and_store(&key, &skey, version, loader).await
    }

    async fn load_and_store(
        &self,
        key: &str,
        skey: &str,
        version: Option<u64>,
        loader: Loader,
    ) -> FetchOutcome {
        let outcome = self.run_loader(key, loader).await;
        if let FetchOutcome::Value(value) = &outcome {
            if let Err(e) = self
                .write_entry(key, skey, version, value.as_ref().clone())
                .await
            {
                self.note_write_failure(key, e);
            }
        }
        outcome
    }

    async fn run_loader(&self, key: &str, loader: Loader) -> FetchOutcome {
        let fetch = loader();
        let result = match self.inner.config.fetch_timeout {
            Some(limit) => match tokio::time::timeout(limit, fetch).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        namespace = %self.namespace(),
                        key,
                        timeout_ms = limit.as_millis() as u64,
                        "source fetch timed out"
                    );
                    return FetchOutcome::TimedOut(limit);
                }
            },
            None => fetch.await,
        };
        match result {
            Ok(Some(value)) => FetchOutcome::Value(Arc::new(value)),
            Ok(None) => FetchOutcome::Missing,
            Err(e) => {
                debug!(namespace = %self.namespace(), key, "source fetch failed: {}", e);
                FetchOutcome::Failed(Arc::from(e))
            }
        }
    }

    async fn maybe_refresh(
        &self,
        key: &str,
        skey: &str,
        version: Option<u64>,
        written_ttl: Duration,
        loader: Loader,
    ) {
        let config = &self.inner.config;
        let refresh_ahead = config.pattern == CachePattern::RefreshAhead;
        if !refresh_ahead && config.early_expiration.is_none() {
            return;
        }
        let remaining = match self.inner.store.ttl(skey).await {
            Ok(Some(remaining)) => remaining,
            Ok(None) => return,
            Err(e) => {
                self.note_store_error(&e);
                return;
            }
        };
        let due = (refresh_ahead
            && should_refresh_ahead(remaining, written_ttl, config.refresh_ahead_fraction))
            || config
                .early_expiration
                .is_some_and(|beta| should_expire_early(remaining, written_ttl, beta));
        if !due {
            return;
        }

        self.inner.stats.refreshes.fetch_add(1, Ordering::Relaxed);
        self.record(MetricEvent::Refresh);
        debug!(
            namespace = %self.namespace(),
            key,
            remaining_ms = remaining.as_millis() as u64,
            "scheduling background refresh"
        );
        let this = self.clone();
        let key = key.to_string();
        let skey = skey.to_string();
        tokio::spawn(async move {
            if let Err(e) = this
                .fetch_coalesced(&key, skey, version, loader, true)
                .await
            {
                warn!(namespace = %this.namespace(), key = %key, "background refresh failed: {}", e);
            }
        });
    }

    pub(crate) async fn write_entry(
        &self,
        key: &str,
        skey: &str,
        version: Option<u64>,
        value: Value,
    ) -> Result<()> {
        let ttl = self.ttl_for(key);
        let bytes = Envelope::new(value, ttl, version).encode()?;
        self.inner.store.set(skey, &bytes, ttl).await?;
        self.inner.stats.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn write_best_effort(&self, key: &str, value: Value) {
        let version = match self.resolve_version(key).await {
            Ok(version) => version,
            Err(e) => return self.note_write_failure(key, e),
        };
        let skey = self.storage_key(key, version);
        if let Err(e) = self.write_entry(key, &skey, version, value).await {
            self.note_write_failure(key, e);
        }
    }

    fn ttl_for(&self, key: &str) -> Duration {
        let base = self.inner.config.ttl;
        match &self.inner.adaptive {
            Some(adaptive) => adaptive.ttl_for(key, base),
            None => base,
        }
    }

    pub(crate) fn storage_key(&self, key: &str, version: Option<u64>) -> String {
        match version {
            Some(v) => format!("{}:{}:v{}", self.inner.config.name, key, v),
            None => format!("{}:{}", self.inner.config.name, key),
        }
    }

    pub(crate) fn version_key(&self, key: &str) -> String {
        format!("{}:{}{}", self.inner.config.name, key, VERSION_SUFFIX)
    }

    /// Current version of `key`, or `None` for unversioned namespaces.
    pub(crate) async fn resolve_version(&self, key: &str) -> Result<Option<u64>> {
        if !self.inner.config.versioned {
            return Ok(None);
        }
        let raw = self.inner.store.get(&self.version_key(key)).await?;
        Ok(Some(parse_counter(raw)))
    }

    fn require_source(&self) -> Result<&Arc<dyn DataSource>> {
        self.inner
            .source
            .as_ref()
            .ok_or_else(|| self.missing_source())
    }

    fn missing_source(&self) -> Error {
        Error::invalid_field(
            format!("namespaces.{}.pattern", self.namespace()),
            format!("pattern '{}' requires a data source", self.inner.config.pattern),
        )
    }

    pub(crate) fn record(&self, event: MetricEvent) {
        self.inner.metrics.record(self.namespace(), event);
    }

    fn note_hit(&self, key: &str) {
        self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
        self.record(MetricEvent::CacheHit);
        if let Some(adaptive) = &self.inner.adaptive {
            adaptive.record_hit(key);
        }
    }

    fn note_miss(&self, key: &str) {
        self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
        self.record(MetricEvent::CacheMiss);
        if let Some(adaptive) = &self.inner.adaptive {
            adaptive.record_miss(key);
        }
    }

    pub(crate) fn note_store_error(&self, error: &Error) {
        if error.is_store_unavailable() {
            self.inner.stats.store_errors.fetch_add(1, Ordering::Relaxed);
            self.record(MetricEvent::StoreUnavailable);
        }
    }

    /// Count a store failure and hand the error back, for `map_err`.
    pub(crate) fn store_failed(&self, error: Error) -> Error {
        self.note_store_error(&error);
        error
    }

    fn note_write_failure(&self, key: &str, error: Error) {
        self.note_store_error(&error);
        warn!(namespace = %self.namespace(), key, "cache write skipped: {}", error);
    }
}

pub(crate) const VERSION_SUFFIX: &str = ":version";

fn parse_counter(raw: Option<Vec<u8>>) -> u64 {
    raw.and_then(|bytes| {
        std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    })
    .unwrap_or(0)
}

fn source_loader(source: Arc<dyn DataSource>, key: &str) -> Loader {
    let key = key.to_string();
    Box::new(move || async move { source.load(&key).await }.boxed())
}
