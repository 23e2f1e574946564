use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{trace, warn};

use crate::counter::CounterStore;
use crate::error::CounterError;

/// A Redis-backed [`CounterStore`] using `INCRBY`.
///
/// Redis holds the high-water mark, so identifiers are never reused across
/// process restarts as long as the key survives.
#[derive(Debug, Clone)]
pub struct RedisCounterStore {
    conn: redis::aio::MultiplexedConnection,
}

fn map_redis_error(operation: &str, err: redis::RedisError) -> CounterError {
    let message = format!("{operation}: {err}");
    if err.is_timeout() {
        CounterError::Timeout(message)
    } else if err.is_connection_dropped() || err.is_connection_refusal() {
        CounterError::Unavailable(message)
    } else {
        CounterError::Operation(message)
    }
}

impl RedisCounterStore {
    /// Creates a counter store over a multiplexed Redis connection.
    pub fn new(conn: redis::aio::MultiplexedConnection) -> Self {
        Self { conn }
    }

    /// Opens a client for `redis_url` and establishes a multiplexed connection.
    pub async fn connect(redis_url: &str) -> Result<Self, CounterError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| map_redis_error("invalid redis url", e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| map_redis_error("failed to connect to redis", e))?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr_by(&self, key: &str, by: i64) -> Result<i64, CounterError> {
        trace!(key, by, "INCRBY on Redis counter");

        let mut conn = self.conn.clone();
        conn.incr::<_, _, i64>(key, by).await.map_err(|e| {
            warn!(key, error = %e, "Redis INCRBY failed");
            map_redis_error("failed to increment counter in Redis", e)
        })
    }
}
