//! Redis list store implementation.
//!
//! Lists are written with `LPUSH`, so the head holds the newest entry and the
//! tail the oldest. `RPOPLPUSH` gives the atomic oldest-first move.

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::MultiplexedConnection;
use tracing::{debug, info};

use crate::error::QueueError;
use crate::store::ListStore;

/// Redis-backed list store.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Open a multiplexed connection to `addr`.
    ///
    /// Accepts either a full `redis://` URL or a bare `host:port`.
    pub async fn connect(addr: &str) -> Result<Self, QueueError> {
        let url = redis_url(addr);
        let client = redis::Client::open(url.as_str())
            .map_err(|e| QueueError::Connection(format!("invalid redis address {url}: {e}")))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Connection(format!("redis connect to {url} failed: {e}")))?;

        info!(url = %url, "redis store connected");

        Ok(Self { conn })
    }
}

/// Normalize a configured address into a connection URL.
pub(crate) fn redis_url(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("redis://{addr}")
    }
}

fn unavailable(op: &str, key: &str, err: redis::RedisError) -> QueueError {
    QueueError::StoreUnavailable(format!("redis {op} {key} failed: {err}"))
}

#[async_trait]
impl ListStore for RedisStore {
    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Connection(format!("redis ping failed: {e}")))?;
        Ok(())
    }

    async fn append(&self, key: &str, value: Bytes) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(key)
            .arg(value.as_ref())
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("LPUSH", key, e))?;
        Ok(())
    }

    async fn move_oldest(&self, src: &str, dst: &str) -> Result<Option<Bytes>, QueueError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("RPOPLPUSH")
            .arg(src)
            .arg(dst)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("RPOPLPUSH", src, e))?;
        Ok(value.map(Bytes::from))
    }

    async fn remove_one(&self, key: &str, value: &[u8]) -> Result<bool, QueueError> {
        debug!(key, "removing one list entry");
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("LREM")
            .arg(key)
            .arg(1)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("LREM", key, e))?;
        Ok(removed > 0)
    }

    async fn range(&self, key: &str) -> Result<Vec<Bytes>, QueueError> {
        let mut conn = self.conn.clone();
        let values: Vec<Vec<u8>> = redis::cmd("LRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("LRANGE", key, e))?;
        // Head is newest; callers expect oldest first.
        Ok(values.into_iter().rev().map(Bytes::from).collect())
    }

    async fn len(&self, key: &str) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let len: usize = redis::cmd("LLEN")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("LLEN", key, e))?;
        Ok(len)
    }

    async fn delete(&self, key: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("DEL", key, e))?;
        Ok(())
    }
}
