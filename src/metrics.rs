//! Counters emitted by the cache manager and the duplicate detector.
//!
//! The engine reports through [`MetricsSink`]; exporting is left to the host.
//! [`NoopMetrics`] is the default, [`TracingMetrics`] turns every event into a
//! `tracing` record and [`InMemoryMetrics`] keeps counts for tests.

use crate::detector::RejectReason;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricEvent {
    CacheHit,
    CacheMiss,
    Invalidation,
    /// A lock attempt found the key locked by someone else.
    LockContention,
    /// Lock retries ran out and an unlocked fetch was made.
    LockExhausted,
    StoreUnavailable,
    Refresh,
    WriteBehindFailed,
    DetectorRejected(RejectReason),
}

impl MetricEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MetricEvent::CacheHit => "cache_hit",
            MetricEvent::CacheMiss => "cache_miss",
            MetricEvent::Invalidation => "invalidation",
            MetricEvent::LockContention => "lock_contention",
            MetricEvent::LockExhausted => "lock_exhausted",
            MetricEvent::StoreUnavailable => "store_unavailable",
            MetricEvent::Refresh => "refresh",
            MetricEvent::WriteBehindFailed => "write_behind_failed",
            MetricEvent::DetectorRejected(_) => "detector_rejected",
        }
    }
}

impl fmt::Display for MetricEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricEvent::DetectorRejected(reason) => write!(f, "{}:{}", self.name(), reason),
            other => f.write_str(other.name()),
        }
    }
}

/// Destination for engine counters, keyed by cache or detector namespace.
pub trait MetricsSink: Send + Sync {
    fn record(&self, namespace: &str, event: MetricEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _namespace: &str, _event: MetricEvent) {}
}

pub fn noop_metrics() -> Arc<dyn MetricsSink> {
    Arc::new(NoopMetrics)
}

/// Logs every event at debug level under the `dedup_cache::metrics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record(&self, namespace: &str, event: MetricEvent) {
        debug!(target: "dedup_cache::metrics", namespace, event = %event, "metric");
    }
}

/// Counts events per namespace.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counts: RwLock<HashMap<(String, MetricEvent), u64>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, namespace: &str, event: MetricEvent) -> u64 {
        self.counts
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(namespace.to_string(), event))
            .copied()
            .unwrap_or(0)
    }

    /// Sum over namespaces.
    pub fn total(&self, event: MetricEvent) -> u64 {
        self.counts
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|((_, e), _)| *e == event)
            .map(|(_, n)| n)
            .sum()
    }

    pub fn clear(&self) {
        self.counts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record(&self, namespace: &str, event: MetricEvent) {
        *self
            .counts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry((namespace.to_string(), event))
            .or_insert(0) += 1;
    }
}
