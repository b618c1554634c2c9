//! Redis counter store - the shared store every instance coordinates through.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};

use admission_core::StoreError;
use admission_core::ports::{CounterStore, WindowCount};

/// Redis connection configuration.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Per-command timeout; exceeding it counts as the store being unavailable
    pub operation_timeout: Duration,
    /// Prefix for every counter key
    pub key_prefix: String,
    /// Whether to start on the local store if Redis is unreachable at startup
    pub fallback_to_memory: bool,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_millis(250),
            key_prefix: "admission".to_string(),
            fallback_to_memory: true,
        }
    }
}

impl RedisStoreConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            connect_timeout: Duration::from_secs(
                std::env::var("REDIS_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            operation_timeout: Duration::from_millis(
                std::env::var("REDIS_OPERATION_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(250),
            ),
            key_prefix: std::env::var("RATE_LIMIT_KEY_PREFIX")
                .unwrap_or_else(|_| "admission".to_string()),
            fallback_to_memory: std::env::var("REDIS_FALLBACK_TO_MEMORY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        }
    }
}

/// Increment, set expiry only when this call created the counter, report PTTL.
/// Returns: [current_count, pttl_ms]
const INCREMENT_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
return {current, ttl}
"#;

/// Decrement an existing positive counter; DECR keeps the TTL.
const DECREMENT_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current > 0 then
    redis.call('DECR', KEYS[1])
end
return current
"#;

/// Redis-backed window counters.
pub struct RedisCounterStore {
    conn: ConnectionManager,
    config: RedisStoreConfig,
    increment: Script,
    decrement: Script,
}

impl RedisCounterStore {
    pub async fn new(config: RedisStoreConfig) -> Result<Self, StoreError> {
        let client =
            Client::open(config.url.as_str()).map_err(|e| StoreError::Unavailable(e.to_string()))?;

        // Use timeout to prevent hanging if Redis is unreachable
        let conn_manager_fut = ConnectionManager::new(client);
        let conn = tokio::time::timeout(config.connect_timeout, conn_manager_fut)
            .await
            .map_err(|_| StoreError::Unavailable("Connection timed out".to_string()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        tracing::info!(url = %config.url, prefix = %config.key_prefix, "Connected to Redis counter store");

        Ok(Self {
            conn,
            config,
            increment: Script::new(INCREMENT_SCRIPT),
            decrement: Script::new(DECREMENT_SCRIPT),
        })
    }

    /// Create from environment configuration.
    pub async fn from_env() -> Result<Self, StoreError> {
        Self::new(RedisStoreConfig::from_env()).await
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = Result<T, RedisError>>,
    {
        tokio::time::timeout(self.config.operation_timeout, op)
            .await
            .map_err(|_| StoreError::Unavailable("Operation timed out".to_string()))?
            .map_err(classify)
    }
}

fn classify(e: RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
    {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Operation(e.to_string())
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let redis_key = self.make_key(key);
        let window_ms = window.as_millis().max(1) as u64;
        let mut conn = self.conn.clone();

        let result: Vec<i64> = self
            .bounded(
                self.increment
                    .key(&redis_key)
                    .arg(window_ms)
                    .invoke_async(&mut conn),
            )
            .await?;

        let count = result.first().copied().unwrap_or(1).max(1) as u64;
        // PTTL is -1/-2 only if the key lost its TTL or vanished mid-script
        let ttl_ms = result
            .get(1)
            .copied()
            .filter(|ttl| *ttl >= 0)
            .map(|ttl| ttl as u64)
            .unwrap_or(window_ms);

        let reset_at = i64::try_from(ttl_ms)
            .ok()
            .and_then(|ms| Utc::now().checked_add_signed(chrono::Duration::milliseconds(ms)))
            .ok_or_else(|| StoreError::Operation(format!("TTL {}ms out of range", ttl_ms)))?;

        Ok(WindowCount { count, reset_at })
    }

    async fn decrement(&self, key: &str) -> Result<(), StoreError> {
        let redis_key = self.make_key(key);
        let mut conn = self.conn.clone();

        let _: i64 = self
            .bounded(self.decrement.key(&redis_key).invoke_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        let redis_key = self.make_key(key);
        let mut conn = self.conn.clone();
        self.bounded(conn.del::<_, ()>(redis_key)).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let pong: String = self
            .bounded(redis::cmd("PING").query_async(&mut conn))
            .await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Operation(format!("unexpected PING reply: {}", pong)))
        }
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
