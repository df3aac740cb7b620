//! Redis-backed store (feature `redis`).

use super::{BackingStore, ScanPage};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, info};

/// INCR and PEXPIRE in one server-side step; also repairs counters left without a TTL.
static INCR_WITH_TTL: Lazy<redis::Script> = Lazy::new(|| {
    redis::Script::new(
        r"
local n = redis.call('INCR', KEYS[1])
if n == 1 or redis.call('PTTL', KEYS[1]) == -1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return n
",
    )
});

static DELETE_IF_EQUALS: Lazy<redis::Script> = Lazy::new(|| {
    redis::Script::new(
        r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
",
    )
});

/// Backing store on a Redis server, shared by every process of a fleet.
///
/// Windows are sorted sets scored by wall-clock milliseconds.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Open a managed connection to `redis_url`.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            error!("Failed to open Redis client: {}", e);
            store_error(e)
        })?;
        let conn = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to create Redis connection manager: {}", e);
            store_error(e)
        })?;
        info!("Redis backing store connected");
        Ok(Self { conn })
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Round-trip PING, for readiness checks.
    pub async fn health_check(&self) -> Result<String> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(store_error)
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

fn store_error(e: redis::RedisError) -> Error {
    Error::store_with_context(
        e.to_string(),
        ErrorContext::new().with_source("redis_store"),
    )
}

fn millis(d: Duration) -> u64 {
    (d.as_millis() as u64).max(1)
}

#[async_trait]
impl BackingStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<Vec<u8>>>(key).await.map_err(store_error)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis(ttl))
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(reply.is_some())
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = DELETE_IF_EQUALS
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(removed > 0)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        conn.del::<_, u64>(keys.to_vec())
            .await
            .map_err(store_error)
    }

    async fn incr(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        conn.incr::<_, _, u64>(key, 1u64).await.map_err(store_error)
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64> {
        let mut conn = self.conn.clone();
        INCR_WITH_TTL
            .key(key)
            .arg(millis(ttl))
            .invoke_async::<u64>(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async::<bool>(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn.clone();
        let ms: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        // -2: missing, -1: no expiry
        Ok((ms >= 0).then(|| Duration::from_millis(ms as u64)))
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        let mut conn = self.conn.clone();
        let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count.max(1))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(ScanPage { cursor, keys })
    }

    async fn window_push(
        &self,
        key: &str,
        member: &str,
        window: Duration,
        max_len: usize,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let now = Self::now_ms();
        let oldest = now.saturating_sub(millis(window));
        let keep = max_len.max(1) as i64;
        redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(key)
            .arg(now)
            .arg(member)
            .ignore()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(format!("({}", oldest))
            .ignore()
            .cmd("ZREMRANGEBYRANK")
            .arg(key)
            .arg(0)
            .arg(-(keep + 1))
            .ignore()
            .cmd("PEXPIRE")
            .arg(key)
            .arg(millis(window))
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn window_members(&self, key: &str, window: Duration) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let oldest = Self::now_ms().saturating_sub(millis(window));
        redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg(format!("({}", oldest))
            .arg("+inf")
            .query_async::<Vec<String>>(&mut conn)
            .await
            .map_err(store_error)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
