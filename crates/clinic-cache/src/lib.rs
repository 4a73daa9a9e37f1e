//! Cache (§4.3): key/value with TTL, a hash keyed by a well-known name, and
//! pub/sub, all against Redis via the `redis` crate's `ConnectionManager`
//! (so a single cheap-to-clone handle survives transient disconnects
//! without this crate re-implementing reconnect logic).

use std::collections::HashMap;
use std::time::Duration;

use futures_util::StreamExt;
use redis::aio::{ConnectionManager, PubSub};
use redis::AsyncCommands;
use tracing::warn;

const READ_WRITE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable")]
    Unavailable(#[source] anyhow::Error),
    #[error("cache operation timed out")]
    Timeout,
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Unavailable(err.into())
    }
}

/// Shared handle onto a Redis connection. Clone-cheap: `ConnectionManager`
/// is itself an `Arc`-backed handle, so every clone of `CacheClient` talks
/// to the same underlying connection and reconnects transparently.
#[derive(Clone)]
pub struct CacheClient {
    client: redis::Client,
    conn: ConnectionManager,
}

impl CacheClient {
    pub const ENV_REDIS_URL: &'static str = "CLINIC_REDIS_URL";

    pub async fn connect_from_env() -> anyhow::Result<Self> {
        let url = std::env::var(Self::ENV_REDIS_URL)
            .map_err(|_| anyhow::anyhow!("missing env var {}", Self::ENV_REDIS_URL))?;
        Self::connect(&url).await
    }

    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(Duration::from_secs(5), client.get_connection_manager())
            .await
            .map_err(|_| anyhow::anyhow!("redis dial timed out"))??;
        Ok(Self { client, conn })
    }

    async fn with_timeout<T>(
        fut: impl std::future::Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, CacheError> {
        tokio::time::timeout(READ_WRITE_TIMEOUT, fut)
            .await
            .map_err(|_| CacheError::Timeout)?
            .map_err(CacheError::from)
    }

    // -- key/value -----------------------------------------------------

    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        Self::with_timeout(conn.set_ex(key, value, ttl.as_secs().max(1))).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        Self::with_timeout(conn.get(key)).await
    }

    pub async fn del(&self, keys: &[&str]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        Self::with_timeout(conn.del(keys)).await
    }

    pub async fn exists(&self, keys: &[&str]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        Self::with_timeout(conn.exists(keys)).await
    }

    // -- hash ------------------------------------------------------------

    pub async fn hset(&self, name: &str, field: &str, value: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        Self::with_timeout(conn.hset(name, field, value)).await
    }

    pub async fn hgetall(&self, name: &str) -> Result<HashMap<String, String>, CacheError> {
        let mut conn = self.conn.clone();
        Self::with_timeout(conn.hgetall(name)).await
    }

    /// Idempotent: deleting a field that does not exist is not an error,
    /// matching `HDEL`'s own semantics (§8: `hdel` twice both succeed).
    pub async fn hdel(&self, name: &str, field: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _removed: i64 = Self::with_timeout(conn.hdel(name, field)).await?;
        Ok(())
    }

    // -- pub/sub ----------------------------------------------------------

    pub async fn publish(&self, channel: &str, message: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        Self::with_timeout(conn.publish(channel, message)).await
    }

    /// Subscribe to `channel`. The returned stream yields every message
    /// delivered from the moment of subscription onward; it is not a
    /// replay log (§4.3). Pub/Sub requires a dedicated connection distinct
    /// from the shared `ConnectionManager`, since Redis multiplexes
    /// subscriber connections differently from command connections.
    pub async fn subscribe(&self, channel: &str) -> Result<CacheSubscription, CacheError> {
        let conn = self.client.get_async_connection().await?;
        let mut pubsub: PubSub = conn.into_pubsub();
        pubsub.subscribe(channel).await?;
        Ok(CacheSubscription {
            pubsub,
            channel: channel.to_string(),
        })
    }
}

/// An active subscription. Dropping it unsubscribes and releases the
/// dedicated connection (§4.6 step 5).
pub struct CacheSubscription {
    pubsub: PubSub,
    channel: String,
}

impl CacheSubscription {
    /// Await the next message payload on this channel. Returns `None` if
    /// the underlying connection closes.
    pub async fn next_message(&mut self) -> Option<String> {
        loop {
            let msg = self.pubsub.on_message().next().await?;
            match msg.get_payload::<String>() {
                Ok(payload) => return Some(payload),
                Err(e) => {
                    warn!(error = %e, channel = %self.channel, "dropping undecodable pubsub payload");
                    continue;
                }
            }
        }
    }
}
