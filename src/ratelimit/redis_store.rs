//! Redis-backed counter store.
//!
//! Lets several service instances share one global quota per key.
//!
//! ## Key layout
//!
//! - Key: `<prefix><subject>|<category>` (prefix defaults to `ratelimit:`)
//! - Value: the integer count, maintained with `INCR`
//! - TTL: the window length, reset whenever a request is counted
//!
//! ## Atomicity
//!
//! `increment` sends `INCR` and `EXPIRE` as one `MULTI`/`EXEC` transaction,
//! so a key can never be left without a TTL. `try_acquire` runs the whole
//! read-compare-increment sequence as a server-side Lua script, which Redis
//! executes without interleaving other commands.
//!
//! ## Error handling
//!
//! Connection and command failures are returned as [`StoreError::Redis`].
//! Nothing is retried or swallowed here; the HTTP layer decides whether an
//! outage fails open or closed.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::{info, trace};

use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;

use super::backend::{Acquire, CounterStore, StoreResult};
use super::key::CounterKey;

/// Admits and counts a request only while the key is below the limit.
///
/// KEYS[1] = counter key, ARGV[1] = limit, ARGV[2] = window seconds.
/// Returns `{admitted, count, ttl}`.
const ACQUIRE_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local limit = tonumber(ARGV[1])
if current < limit then
    current = redis.call('INCR', KEYS[1])
    redis.call('EXPIRE', KEYS[1], ARGV[2])
    return {1, current, tonumber(ARGV[2])}
end
return {0, current, redis.call('TTL', KEYS[1])}
"#;

/// Configuration for Redis storage.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Connection URL (default: "redis://127.0.0.1/")
    pub url: String,
    /// Prefix for every counter key (default: "ratelimit:")
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1/".to_string(),
            key_prefix: "ratelimit:".to_string(),
        }
    }
}

/// Counter store shared across processes through Redis.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    key_prefix: String,
    acquire_script: Script,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Connect to Redis at `url` with the default key prefix.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        Self::connect_with_config(RedisStoreConfig {
            url: url.to_string(),
            ..RedisStoreConfig::default()
        })
        .await
    }

    /// Connect to Redis with custom configuration.
    pub async fn connect_with_config(config: RedisStoreConfig) -> StoreResult<Self> {
        let client = Client::open(config.url.as_str())?;
        let connection = ConnectionManager::new(client).await?;

        info!(url = %config.url, prefix = %config.key_prefix, "Connected to Redis counter store");

        Ok(Self {
            connection,
            key_prefix: config.key_prefix,
            acquire_script: Script::new(ACQUIRE_SCRIPT),
            clock: Arc::new(SystemClock::new()),
        })
    }

    /// Replace the clock used to turn TTLs into absolute timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Get the Redis key for a counter.
    fn key(&self, key: &CounterKey) -> String {
        format!("{}{}", self.key_prefix, key.to_string_key())
    }

    fn expiry_from_ttl(&self, ttl: i64) -> Option<i64> {
        // -2: no such key, -1: key without a TTL
        (ttl >= 0).then(|| self.clock.now() + ttl)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &CounterKey) -> StoreResult<Option<u64>> {
        let mut conn = self.connection.clone();
        let count: Option<u64> = conn.get(self.key(key)).await?;
        Ok(count)
    }

    async fn increment(&self, key: &CounterKey, window_secs: u64) -> StoreResult<u64> {
        let redis_key = self.key(key);
        let mut conn = self.connection.clone();

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(&redis_key, 1u64)
            .expire(&redis_key, i64::try_from(window_secs).unwrap_or(i64::MAX))
            .ignore()
            .query_async(&mut conn)
            .await?;

        trace!(key = %key, count, window_secs, "Incremented Redis counter");
        Ok(count)
    }

    async fn delete(&self, key: &CounterKey) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.del(self.key(key)).await?;
        Ok(())
    }

    async fn get_expiry(&self, key: &CounterKey) -> StoreResult<Option<i64>> {
        let mut conn = self.connection.clone();
        let ttl: i64 = conn.ttl(self.key(key)).await?;
        Ok(self.expiry_from_ttl(ttl))
    }

    async fn try_acquire(
        &self,
        key: &CounterKey,
        limit: u64,
        window_secs: u64,
    ) -> StoreResult<Acquire> {
        let mut conn = self.connection.clone();

        let (admitted, count, ttl): (i64, i64, i64) = self
            .acquire_script
            .key(self.key(key))
            .arg(limit)
            .arg(window_secs)
            .invoke_async(&mut conn)
            .await?;

        let count = u64::try_from(count)
            .map_err(|_| StoreError::Unavailable(format!("negative count for {key}")))?;

        Ok(Acquire {
            admitted: admitted == 1,
            count,
            expires_at: self.expiry_from_ttl(ttl),
        })
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
