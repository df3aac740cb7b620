use crate::BoxError;
use async_trait::async_trait;
use serde_json::Value;

/// The source of truth behind a namespace.
///
/// Required by the read-through, write-through and write-behind patterns, and
/// used for background refreshes of refresh-ahead namespaces. Calls are never
/// retried by the cache, except for write-behind's own retry queue.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Load the value for `key`. `Ok(None)` when the source has no such record.
    async fn load(&self, key: &str) -> Result<Option<Value>, BoxError>;

    /// Persist `value` under `key`.
    async fn store(&self, key: &str, value: &Value) -> Result<(), BoxError>;
}
