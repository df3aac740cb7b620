//! Stampede protection for cache fills.
//!
//! # Concurrency Guard
//!
//! Three mechanisms, stacked by [`CacheManager`](crate::cache::CacheManager):
//!
//! | Mechanism | Scope | Type |
//! |-----------|-------|------|
//! | Request coalescing | one process | [`RequestCoalescer`] |
//! | Distributed lock | whole fleet | [`DistributedLock`] |
//! | Early expiration | per hit | [`should_refresh_ahead`], [`should_expire_early`] |
//!
//! Coalescing merges concurrent callers for the same key inside a process;
//! the lock then makes sure only one process at a time asks the source. The
//! lock's TTL only exists so a crashed holder cannot block a key forever.

mod coalesce;
mod early;
mod lock;

pub use coalesce::RequestCoalescer;
pub use early::{should_expire_early, should_expire_early_with, should_refresh_ahead};
pub use lock::{DistributedLock, LockConfig, LockGuard, LockToken};
