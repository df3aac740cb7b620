//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use dedup_cache::store::{BackingStore, ScanPage};
use dedup_cache::{BoxError, DataSource, Error, ErrorContext, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Install a log subscriber honouring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Data source backed by a map, counting calls and failing the first
/// `fail_writes` stores.
#[derive(Default)]
pub struct MapSource {
    pub records: Mutex<HashMap<String, Value>>,
    pub loads: AtomicUsize,
    pub stores: AtomicUsize,
    pub fail_writes: AtomicUsize,
    pub reject_writes: bool,
}

impl MapSource {
    pub fn with_record(key: &str, value: Value) -> Self {
        let source = Self::default();
        source.put(key, value);
        source
    }

    pub fn rejecting() -> Self {
        Self {
            reject_writes: true,
            ..Self::default()
        }
    }

    pub fn put(&self, key: &str, value: Value) {
        self.records.lock().unwrap().insert(key.to_string(), value);
    }

    pub fn record(&self, key: &str) -> Option<Value> {
        self.records.lock().unwrap().get(key).cloned()
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn stores(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for MapSource {
    async fn load(&self, key: &str) -> std::result::Result<Option<Value>, BoxError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.record(key))
    }

    async fn store(&self, key: &str, value: &Value) -> std::result::Result<(), BoxError> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        if self.reject_writes {
            return Err("database is read-only".into());
        }
        let remaining = self.fail_writes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_writes.store(remaining - 1, Ordering::SeqCst);
            return Err("transient write failure".into());
        }
        self.put(key, value.clone());
        Ok(())
    }
}

/// Backing store whose every call fails, standing in for an unreachable Redis.
pub struct FailingStore;

fn down() -> Error {
    Error::store_with_context(
        "connection refused",
        ErrorContext::new().with_source("failing_store"),
    )
}

#[async_trait]
impl BackingStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Err(down())
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<()> {
        Err(down())
    }

    async fn set_if_absent(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<bool> {
        Err(down())
    }

    async fn delete_if_equals(&self, _key: &str, _expected: &[u8]) -> Result<bool> {
        Err(down())
    }

    async fn delete(&self, _keys: &[String]) -> Result<u64> {
        Err(down())
    }

    async fn incr(&self, _key: &str) -> Result<u64> {
        Err(down())
    }

    async fn incr_with_ttl(&self, _key: &str, _ttl: Duration) -> Result<u64> {
        Err(down())
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool> {
        Err(down())
    }

    async fn ttl(&self, _key: &str) -> Result<Option<Duration>> {
        Err(down())
    }

    async fn scan(&self, _cursor: u64, _pattern: &str, _count: usize) -> Result<ScanPage> {
        Err(down())
    }

    async fn window_push(
        &self,
        _key: &str,
        _member: &str,
        _window: Duration,
        _max_len: usize,
    ) -> Result<()> {
        Err(down())
    }

    async fn window_members(&self, _key: &str, _window: Duration) -> Result<Vec<String>> {
        Err(down())
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}
