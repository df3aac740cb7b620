//! Invalidation strategies.
//!
//! # Invalidation Engine
//!
//! | Strategy | Trigger | Where |
//! |----------|---------|-------|
//! | Fixed TTL | passive, store expiry | [`NamespaceConfig::ttl`](crate::cache::NamespaceConfig) |
//! | Adaptive TTL | per-key hit ratio | [`AdaptiveTtl`] |
//! | Event | `invalidate_event(event, data)` | [`EventRegistry`], [`KeyTemplate`] |
//! | Version | `bump_version(key)` | [`CacheManager`](crate::cache::CacheManager) |
//! | Dependency graph | `invalidate(key)` | [`DependencyGraph`] |
//!
//! The pieces here are in-process registries; the deletes themselves are done
//! by the owning [`CacheManager`](crate::cache::CacheManager), which reports
//! every run as an [`InvalidationReport`].

mod dependency;
mod events;
mod ttl;

pub use dependency::DependencyGraph;
pub use events::{EventRegistry, KeyTemplate};
pub use ttl::{AdaptiveTtl, AdaptiveTtlConfig};

/// What one invalidation call touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Logical keys reached, in visiting order. Keys matched by wildcard
    /// patterns appear as storage keys.
    pub visited: Vec<String>,
    /// Storage keys that existed and were deleted.
    pub deleted: u64,
}

impl InvalidationReport {
    pub(crate) fn merge(&mut self, other: InvalidationReport) {
        for key in other.visited {
            if !self.visited.contains(&key) {
                self.visited.push(key);
            }
        }
        self.deleted += other.deleted;
    }
}
