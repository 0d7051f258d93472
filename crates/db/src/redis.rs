//! Redis client wrapper.
//!
//! One [`ConnectionManager`] per process, cloned per operation (clones share
//! the underlying multiplexed connection). Pub/sub needs dedicated
//! connections, so the wrapper also keeps the [`redis::Client`] around.

use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{HistogramVec, IntCounterVec, Registry};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::error::AppResult;
use tracing::{debug, info};

lazy_static! {
    static ref REDIS_COMMAND_DURATION: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "redis_command_duration_seconds",
            "Duration of Redis commands in seconds"
        ),
        &["command"]
    )
    .unwrap();
    static ref CACHE_REQUESTS: IntCounterVec = IntCounterVec::new(
        prometheus::opts!("redis_cache_requests_total", "Number of cache reads by result"),
        &["result"]
    )
    .unwrap();
}

/// Register this module's metrics with the given registry.
pub fn register_metrics(registry: &Registry) -> anyhow::Result<()> {
    registry.register(Box::new(REDIS_COMMAND_DURATION.clone()))?;
    registry.register(Box::new(CACHE_REQUESTS.clone()))?;
    Ok(())
}

fn timer(command: &str) -> prometheus::HistogramTimer {
    REDIS_COMMAND_DURATION
        .with_label_values(&[command])
        .start_timer()
}

fn count_cache<T>(key: &str, result: &Option<T>) {
    let label = if result.is_some() { "hit" } else { "miss" };
    CACHE_REQUESTS.with_label_values(&[label]).inc();
    debug!(key = %key, "cache {}", label);
}

/// Common cache TTL durations
pub struct CacheTtl;

impl CacheTtl {
    /// 5 minutes - ephemeral playback links
    pub const SHORT: Duration = Duration::from_secs(300);

    /// 1 hour - refresh locks, per-GUID processing locks
    pub const HOUR: Duration = Duration::from_secs(3600);

    /// 30 days - canonical media metadata
    pub const MONTH: Duration = Duration::from_secs(30 * 86400);

    /// 8 weeks - torrent corpus entries and magnet resolutions
    pub const TORRENT: Duration = Duration::from_secs(8 * 7 * 86400);
}

/// A sorted-set member with its score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredItem {
    pub value: String,
    pub score: i64,
}

/// Redis client wrapper shared by every subsystem.
#[derive(Clone)]
pub struct Db {
    client: redis::Client,
    manager: ConnectionManager,
}

impl Db {
    /// Connect to Redis. Fatal at startup when this fails.
    pub async fn connect(redis_url: &str) -> AppResult<Self> {
        info!("Connecting to Redis at {}", redis_url);
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        info!("Redis connection established");
        Ok(Self { client, manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }

    pub async fn ping(&self) -> AppResult<()> {
        let _timer = timer("PING");
        let _: String = redis::cmd("PING").query_async(&mut self.conn()).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let _timer = timer("GET");
        let value: Option<String> = self.conn().get(key).await?;
        count_cache(key, &value);
        Ok(value)
    }

    /// Set a value with an optional expiry.
    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()> {
        let _timer = timer("SET");
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl.filter(|ttl| !ttl.is_zero()) {
            cmd.arg("EX").arg(ttl.as_secs());
        }
        let _: () = cmd.query_async(&mut self.conn()).await?;
        Ok(())
    }

    /// Read a JSON value. Deserialization failures are logged and treated
    /// as a miss so one corrupt record cannot wedge its caller.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        let raw = self.get(key).await?;
        Ok(raw.and_then(|json| match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(key = %key, error = %err, "discarding undecodable record");
                None
            }
        }))
    }

    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> AppResult<()> {
        let json = serde_json::to_string(value)?;
        self.set(key, &json, ttl).await
    }

    /// Add a member to a sorted set. Returns whether the member was new.
    pub async fn zadd(&self, key: &str, member: &str, score: i64) -> AppResult<bool> {
        let _timer = timer("ZADD");
        let added: i64 = self.conn().zadd(key, member, score).await?;
        Ok(added > 0)
    }

    /// Read a sorted set highest-score-first, scores included.
    pub async fn zrange_desc(
        &self,
        key: &str,
        min_score: i64,
        limit: usize,
    ) -> AppResult<Vec<ScoredItem>> {
        let _timer = timer("ZRANGE");
        let raw: Vec<(String, i64)> = redis::cmd("ZREVRANGEBYSCORE")
            .arg(key)
            .arg("+inf")
            .arg(min_score)
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(0)
            .arg(limit as isize)
            .query_async(&mut self.conn())
            .await?;
        CACHE_REQUESTS
            .with_label_values(&[if raw.is_empty() { "miss" } else { "hit" }])
            .inc();
        Ok(raw
            .into_iter()
            .map(|(value, score)| ScoredItem { value, score })
            .collect())
    }

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> AppResult<bool> {
        let _timer = timer("HSET");
        let set: i64 = self.conn().hset(key, field, value).await?;
        Ok(set > 0)
    }

    pub async fn hset_multiple(&self, key: &str, entries: &[(String, String)]) -> AppResult<()> {
        let _timer = timer("HSET");
        self.conn().hset_multiple::<_, _, _, ()>(key, entries).await?;
        Ok(())
    }

    pub async fn hget(&self, key: &str, field: &str) -> AppResult<Option<String>> {
        let _timer = timer("HGET");
        let value: Option<String> = self.conn().hget(key, field).await?;
        count_cache(key, &value);
        Ok(value)
    }

    pub async fn hgetall(
        &self,
        key: &str,
    ) -> AppResult<std::collections::HashMap<String, String>> {
        let _timer = timer("HGETALL");
        let value: std::collections::HashMap<String, String> = self.conn().hgetall(key).await?;
        Ok(value)
    }

    /// Bump the expiry of a key that just got used.
    pub async fn set_ttl(&self, key: &str, ttl: Duration) -> AppResult<bool> {
        let _timer = timer("EXPIRE");
        let set: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs())
            .query_async(&mut self.conn())
            .await?;
        Ok(set > 0)
    }

    pub async fn ttl(&self, key: &str) -> AppResult<i64> {
        let _timer = timer("TTL");
        let value: i64 = redis::cmd("TTL")
            .arg(key)
            .query_async(&mut self.conn())
            .await?;
        Ok(value)
    }

    /// Atomic set-if-absent with expiry. `true` means the caller now holds
    /// the lock. Locks are held by TTL, never released explicitly.
    pub async fn try_lock(&self, key: &str, ttl: Duration) -> AppResult<bool> {
        let _timer = timer("SET");
        let acquired: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut self.conn())
            .await?;
        Ok(acquired.is_some())
    }

    /// HyperLogLog add; returns whether the estimate changed.
    pub async fn unique_add(&self, key: &str, value: &str) -> AppResult<bool> {
        let _timer = timer("PFADD");
        let added: i64 = self.conn().pfadd(key, value).await?;
        Ok(added > 0)
    }

    pub async fn unique_count(&self, key: &str) -> AppResult<u64> {
        let _timer = timer("PFCOUNT");
        let count: u64 = self.conn().pfcount(key).await?;
        Ok(count)
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> AppResult<usize> {
        let _timer = timer("PUBLISH");
        let receivers: usize = self.conn().publish(channel, payload).await?;
        Ok(receivers)
    }

    /// Open a dedicated pub/sub connection subscribed to one channel.
    pub async fn subscribe(&self, channel: &str) -> AppResult<redis::aio::PubSub> {
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(channel).await?;
        Ok(pubsub)
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires a running Redis instance
    async fn test_set_and_get() {
        let db = Db::connect("redis://localhost:6379").await.unwrap();
        db.set("annatar:test:key", "value", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        let value = db.get("annatar:test:key").await.unwrap();
        assert_eq!(value.as_deref(), Some("value"));
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis instance
    async fn test_try_lock_is_exclusive() {
        let db = Db::connect("redis://localhost:6379").await.unwrap();
        let key = format!("annatar:test:lock:{}", uuid::Uuid::new_v4());
        assert!(db.try_lock(&key, Duration::from_secs(5)).await.unwrap());
        assert!(!db.try_lock(&key, Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires a running Redis instance
    async fn test_zrange_desc_orders_by_score() {
        let db = Db::connect("redis://localhost:6379").await.unwrap();
        let key = format!("annatar:test:zset:{}", uuid::Uuid::new_v4());
        db.zadd(&key, "low", 1).await.unwrap();
        db.zadd(&key, "high", 10).await.unwrap();
        let items = db.zrange_desc(&key, 0, 10).await.unwrap();
        assert_eq!(items[0].value, "high");
        assert_eq!(items[1].value, "low");
    }
}
