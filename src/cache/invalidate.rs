//! Explicit invalidation: dependency cascades, events and version bumps.

use super::manager::{CacheManager, VERSION_SUFFIX};
use crate::invalidation::InvalidationReport;
use crate::metrics::MetricEvent;
use crate::store::escape_glob;
use crate::{Error, Result};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use tracing::debug;

const SCAN_BATCH: usize = 256;

impl CacheManager {
    /// Delete `key` and, transitively, every key registered as depending on it.
    ///
    /// Each key is deleted once even when the graph has cycles. Deletion is
    /// unconditional, whatever was written last. Store failures are returned.
    pub async fn invalidate(&self, key: &str) -> Result<InvalidationReport> {
        let visited = self.inner.dependencies.cascade(key);
        let mut storage_keys = Vec::with_capacity(visited.len());
        for k in &visited {
            let version = self
                .resolve_version(k)
                .await
                .map_err(|e| self.store_failed(e))?;
            storage_keys.push(self.storage_key(k, version));
        }
        let deleted = self
            .inner
            .store
            .delete(&storage_keys)
            .await
            .map_err(|e| self.store_failed(e))?;
        self.note_invalidation(visited.len());
        debug!(
            namespace = %self.namespace(),
            key,
            visited = visited.len(),
            deleted,
            "invalidated"
        );
        Ok(InvalidationReport { visited, deleted })
    }

    /// Register key templates (`user:{id}`, `feed:{id}:*`) to invalidate when `event` fires.
    pub fn register_event<I, S>(&self, event: &str, key_templates: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.events.register(event, key_templates);
    }

    /// Invalidate everything registered for `event`, interpolating `data` into the templates.
    ///
    /// Exact keys go through [`invalidate`](Self::invalidate) and cascade to
    /// their dependents. Wildcard patterns are resolved with an incremental
    /// scan and delete the matched entries only; version counters are never
    /// matched.
    pub async fn invalidate_event(&self, event: &str, data: &Value) -> Result<InvalidationReport> {
        let mut report = InvalidationReport::default();
        for (pattern, wildcard) in self.inner.events.resolve(event, data) {
            let part = if wildcard {
                self.invalidate_matching(&pattern).await?
            } else {
                self.invalidate(&pattern).await?
            };
            report.merge(part);
        }
        debug!(
            namespace = %self.namespace(),
            event,
            visited = report.visited.len(),
            deleted = report.deleted,
            "event invalidation done"
        );
        Ok(report)
    }

    async fn invalidate_matching(&self, pattern: &str) -> Result<InvalidationReport> {
        let glob = format!("{}:{}", escape_glob(self.namespace()), pattern);
        let mut matched = BTreeSet::new();
        let mut cursor = 0;
        loop {
            let page = self
                .inner
                .store
                .scan(cursor, &glob, SCAN_BATCH)
                .await
                .map_err(|e| self.store_failed(e))?;
            matched.extend(
                page.keys
                    .into_iter()
                    .filter(|k| !k.ends_with(VERSION_SUFFIX)),
            );
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        let keys: Vec<String> = matched.into_iter().collect();
        let deleted = if keys.is_empty() {
            0
        } else {
            self.inner
                .store
                .delete(&keys)
                .await
                .map_err(|e| self.store_failed(e))?
        };
        self.note_invalidation(keys.len());
        Ok(InvalidationReport {
            visited: keys,
            deleted,
        })
    }

    /// Advance the version of `key`. Entries written under older versions are
    /// no longer served and expire on their own. Returns the new version.
    pub async fn bump_version(&self, key: &str) -> Result<u64> {
        if !self.inner.config.versioned {
            return Err(Error::invalid_field(
                format!("namespaces.{}.versioned", self.namespace()),
                "bump_version requires a versioned namespace",
            ));
        }
        let version = self
            .inner
            .store
            .incr(&self.version_key(key))
            .await
            .map_err(|e| self.store_failed(e))?;
        self.note_invalidation(1);
        debug!(namespace = %self.namespace(), key, version, "version bumped");
        Ok(version)
    }

    /// Current version of `key`; `0` before the first bump and for unversioned namespaces.
    pub async fn current_version(&self, key: &str) -> Result<u64> {
        Ok(self.resolve_version(key).await?.unwrap_or(0))
    }

    fn note_invalidation(&self, keys: usize) {
        self.inner
            .stats
            .invalidations
            .fetch_add(keys as u64, Ordering::Relaxed);
        self.record(MetricEvent::Invalidation);
    }
}
