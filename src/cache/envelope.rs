use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Stored form of a cache entry: `{"version": n?, "ttl_ms": n, "value": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// TTL the entry was written with.
    pub ttl_ms: u64,
    pub value: Value,
}

impl Envelope {
    pub fn new(value: Value, ttl: Duration, version: Option<u64>) -> Self {
        Self {
            version,
            ttl_ms: ttl.as_millis() as u64,
            value,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Written under `current` or later. Entries of an unversioned namespace are always current.
    pub fn is_current(&self, current: Option<u64>) -> bool {
        match current {
            None => true,
            Some(current) => self.version.is_some_and(|v| v >= current),
        }
    }
}
