//! In-process backing store.

use super::{glob_match, BackingStore, ScanPage};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Slot {
    Bytes(Vec<u8>),
    Window(VecDeque<(Instant, String)>),
}

#[derive(Debug, Clone)]
struct StoreEntry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl StoreEntry {
    fn bytes(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            slot: Slot::Bytes(data),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Backing store held in process memory.
///
/// Expiry follows the tokio clock, so tests running with a paused runtime can
/// move time forward with `tokio::time::advance`. Every operation is atomic
/// with respect to the others.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoreEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .map(|entries| entries.values().filter(|e| !e.is_expired(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoreEntry>>> {
        self.entries.lock().map_err(|_| {
            Error::store_with_context(
                "memory store poisoned",
                ErrorContext::new().with_source("memory_store"),
            )
        })
    }

    /// Look up a live entry, dropping it first if it has expired.
    fn live<'a>(
        entries: &'a mut HashMap<String, StoreEntry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a mut StoreEntry> {
        if entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }

    fn wrong_type(key: &str) -> Error {
        Error::store_with_context(
            "operation against a key holding the wrong kind of value",
            ErrorContext::new()
                .with_field_path(key.to_string())
                .with_source("memory_store"),
        )
    }

    fn increment(entry: &mut StoreEntry, key: &str) -> Result<u64> {
        let Slot::Bytes(ref mut data) = entry.slot else {
            return Err(Self::wrong_type(key));
        };
        let current = std::str::from_utf8(data)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or_else(|| {
                Error::store_with_context(
                    "value is not an integer",
                    ErrorContext::new()
                        .with_field_path(key.to_string())
                        .with_source("memory_store"),
                )
            })?;
        let next = current.saturating_add(1);
        *data = next.to_string().into_bytes();
        Ok(next)
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.lock()?;
        match Self::live(&mut entries, key, Instant::now()) {
            Some(StoreEntry {
                slot: Slot::Bytes(data),
                ..
            }) => Ok(Some(data.clone())),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut entries = self.lock()?;
        entries.insert(key.to_string(), StoreEntry::bytes(value.to_vec(), Some(ttl)));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let mut entries = self.lock()?;
        if Self::live(&mut entries, key, Instant::now()).is_some() {
            return Ok(false);
        }
        entries.insert(key.to_string(), StoreEntry::bytes(value.to_vec(), Some(ttl)));
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let mut entries = self.lock()?;
        let matches = matches!(
            Self::live(&mut entries, key, Instant::now()),
            Some(StoreEntry { slot: Slot::Bytes(data), .. }) if data.as_slice() == expected
        );
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = entries.remove(key) {
                if !entry.is_expired(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn incr(&self, key: &str) -> Result<u64> {
        let mut entries = self.lock()?;
        match Self::live(&mut entries, key, Instant::now()) {
            Some(entry) => Self::increment(entry, key),
            None => {
                entries.insert(key.to_string(), StoreEntry::bytes(b"1".to_vec(), None));
                Ok(1)
            }
        }
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        match Self::live(&mut entries, key, now) {
            Some(entry) => {
                let count = Self::increment(entry, key)?;
                if entry.expires_at.is_none() {
                    entry.expires_at = Some(now + ttl);
                }
                Ok(count)
            }
            None => {
                entries.insert(key.to_string(), StoreEntry::bytes(b"1".to_vec(), Some(ttl)));
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        match Self::live(&mut entries, key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        Ok(Self::live(&mut entries, key, now)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        let entries = self.lock()?;
        let now = Instant::now();
        // sorted snapshot so the cursor is a stable offset between calls
        let mut keys: Vec<&String> = entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, _)| k)
            .collect();
        keys.sort();

        let start = cursor as usize;
        let end = (start + count.max(1)).min(keys.len());
        let page = keys
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .filter(|k| glob_match(pattern, k))
            .map(|k| (*k).clone())
            .collect();
        let next = if end >= keys.len() { 0 } else { end as u64 };
        Ok(ScanPage { cursor: next, keys: page })
    }

    async fn window_push(
        &self,
        key: &str,
        member: &str,
        window: Duration,
        max_len: usize,
    ) -> Result<()> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        if Self::live(&mut entries, key, now).is_none() {
            entries.insert(
                key.to_string(),
                StoreEntry {
                    slot: Slot::Window(VecDeque::new()),
                    expires_at: None,
                },
            );
        }
        let Some(entry) = entries.get_mut(key) else {
            return Err(Self::wrong_type(key));
        };
        let Slot::Window(ref mut members) = entry.slot else {
            return Err(Self::wrong_type(key));
        };
        members.retain(|(at, _)| now.saturating_duration_since(*at) < window);
        members.push_back((now, member.to_string()));
        while members.len() > max_len.max(1) {
            members.pop_front();
        }
        entry.expires_at = Some(now + window);
        Ok(())
    }

    async fn window_members(&self, key: &str, window: Duration) -> Result<Vec<String>> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        match Self::live(&mut entries, key, now) {
            Some(StoreEntry {
                slot: Slot::Window(members),
                ..
            }) => Ok(members
                .iter()
                .filter(|(at, _)| now.saturating_duration_since(*at) < window)
                .map(|(_, m)| m.clone())
                .collect()),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
