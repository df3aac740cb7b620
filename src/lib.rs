//! # dedup-cache
//!
//! Stampede-safe caching patterns and template-based duplicate detection on
//! top of one shared key-value store.
//!
//! ## Overview
//!
//! Two engines share a [`store::BackingStore`]:
//!
//! - [`CacheManager`] serves reads and writes for named namespaces under one of
//!   five caching patterns, coalesces concurrent misses, guards recomputation
//!   with a distributed lock and cascades invalidations through declared
//!   dependencies.
//! - [`DuplicateDetector`] normalizes submitted text into a template, counts
//!   template occurrences per sender and globally inside a sliding window and
//!   compares fingerprints of recent payloads to catch near-duplicates.
//!
//! Every process pointed at the same store sees the same counters, cached
//! values and locks.
//!
//! ## Quick Start
//!
//! ```rust
//! use dedup_cache::store::MemoryStore;
//! use dedup_cache::{CacheManager, NamespaceConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> dedup_cache::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let users = CacheManager::builder(store, NamespaceConfig::new("users", Duration::from_secs(60)))
//!     .build()?;
//!
//! let name: String = users
//!     .get_or_fetch("42", || async { Ok::<_, std::io::Error>("ada".to_string()) })
//!     .await?;
//! assert_eq!(name, "ada");
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`store`] | Backing store trait, in-memory and Redis implementations |
//! | [`cache`] | Cache manager and caching patterns |
//! | [`guard`] | Request coalescing, distributed lock, early expiration |
//! | [`invalidation`] | Dependency cascades, event templates, adaptive TTL |
//! | [`template`] | Text normalization and template hashing |
//! | [`fingerprint`] | SimHash and MinHash fingerprints |
//! | [`detector`] | Duplicate and spam detection pipeline |
//! | [`metrics`] | Metric events and sinks |
//! | [`config`] | YAML engine configuration |

pub mod cache;
pub mod config;
pub mod detector;
pub mod fingerprint;
pub mod guard;
pub mod invalidation;
pub mod metrics;
pub mod store;
pub mod template;

// Re-export main types for convenience
pub use cache::{CacheManager, CacheManagerBuilder, CachePattern, DataSource, NamespaceConfig};
pub use config::EngineConfig;
pub use detector::{Decision, DetectorConfig, DuplicateDetector, RejectReason};
pub use metrics::{MetricEvent, MetricsSink};
pub use store::BackingStore;
pub use template::{TemplateHash, TemplateNormalizer};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{BoxError, Error, ErrorContext, SharedError};
