//! Backing store abstraction shared by the cache manager and the duplicate detector.
//!
//! # Key-Value Backing Store
//!
//! All shared mutable state of the engine lives behind [`BackingStore`]. The
//! engine never holds an application-level lock for longer than one call into
//! this trait.
//!
//! | Capability | Used by |
//! |------------|---------|
//! | `get` / `set` / `delete` | cache entries, whitelist flags |
//! | `incr` / `expire` / `ttl` | version counters, refresh-ahead |
//! | `scan` | wildcard event invalidation |
//! | `set_if_absent` / `delete_if_equals` | distributed lock |
//! | `incr_with_ttl` | rate limits, occurrence counters |
//! | `window_push` / `window_members` | near-duplicate fingerprint windows |
//!
//! ## Implementations
//!
//! - [`MemoryStore`]: in-process store driven by the tokio clock
//! - `RedisStore`: Redis-backed store (feature `redis`)

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// One page of an incremental keyspace scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor to pass to the next call; `0` means the scan is complete.
    pub cursor: u64,
    pub keys: Vec<String>,
}

#[async_trait]
pub trait BackingStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Set `key` only if it does not exist yet. Returns `true` when the value was written.
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool>;

    /// Delete `key` only while it still holds `expected`.
    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// Atomic increment. A missing key counts from zero and gets no expiry.
    async fn incr(&self, key: &str) -> Result<u64>;

    /// Atomic increment that sets `ttl` in the same step when the counter is created.
    ///
    /// A counter found without any expiry is given `ttl` as well, so a counter can
    /// never outlive its window.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remaining time-to-live. `None` when the key is missing or never expires.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Non-blocking incremental scan over keys matching a glob `pattern` (`*`, `?`).
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage>;

    /// Append `member` to the sliding window at `key`.
    ///
    /// Members older than `window` are dropped, at most `max_len` of the newest
    /// members are kept and the whole window expires `window` after the last push.
    async fn window_push(
        &self,
        key: &str,
        member: &str,
        window: Duration,
        max_len: usize,
    ) -> Result<()>;

    /// Members pushed within the last `window`, oldest first.
    async fn window_members(&self, key: &str, window: Duration) -> Result<Vec<String>>;

    fn name(&self) -> &'static str;
}

/// Escape glob metacharacters so `raw` matches only itself in [`BackingStore::scan`].
pub fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Match a Redis-style glob: `*` any run, `?` one character, `\` escapes.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                '\\' if pi + 1 < p.len() && p[pi + 1] == t[ti] => {
                    pi += 2;
                    ti += 1;
                    continue;
                }
                c if c != '\\' && c == t[ti] => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                _ => {}
            }
        }
        // mismatch: backtrack to the last star, letting it swallow one more char
        match star {
            Some((sp, st)) => {
                pi = sp + 1;
                ti = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
