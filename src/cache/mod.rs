//! Namespaced cache over a shared backing store.
//!
//! # Cache Manager
//!
//! Each [`CacheManager`] owns one namespace: its [`NamespaceConfig`], the
//! in-process coalescing table, the dependency graph, the event registry and
//! adaptive TTL statistics. Everything shared across processes lives in the
//! [`BackingStore`](crate::store::BackingStore).
//!
//! | Pattern | Read | Write |
//! |---------|------|-------|
//! | cache-aside | `get_or_fetch` with a caller closure | best-effort cache write |
//! | read-through | `get` loads misses from the [`DataSource`] | best-effort cache write |
//! | refresh-ahead | as read-through; near-expiry hits refresh in the background | best-effort cache write |
//! | write-through | as read-through | source, then cache; both must succeed |
//! | write-behind | as read-through | cache, then a queued, retried source write |
//!
//! Misses are filled under the [`guard`](crate::guard): one fetch per key per
//! process, one per key per fleet while the lock can be had.
//!
//! ## Storage layout
//!
//! | Key | Content |
//! |-----|---------|
//! | `{ns}:{key}` | JSON envelope `{"ttl_ms": .., "value": ..}` |
//! | `{ns}:{key}:v{n}` | the same, in versioned namespaces, with `"version": n` |
//! | `{ns}:{key}:version` | version counter, never expires |
//! | `lock:{storage key}` | fill lock token |
//!
//! ## Example
//!
//! ```rust
//! use dedup_cache::cache::{CacheManager, NamespaceConfig};
//! use dedup_cache::store::MemoryStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn demo() -> dedup_cache::Result<()> {
//! let cache = CacheManager::builder(
//!     Arc::new(MemoryStore::new()),
//!     NamespaceConfig::new("profiles", Duration::from_secs(300)),
//! )
//! .build()?;
//!
//! let name: String = cache
//!     .get_or_fetch("42", || async { Ok::<_, std::io::Error>("ada".to_string()) })
//!     .await?;
//! assert_eq!(name, "ada");
//! # Ok(())
//! # }
//! ```

mod config;
mod envelope;
mod invalidate;
mod manager;
mod source;
mod write_behind;

pub use config::{CachePattern, NamespaceConfig, WriteBehindConfig};
pub use manager::{CacheManager, CacheManagerBuilder, CacheStats};
pub use source::DataSource;
