//! Redis client with connection management
//!
//! Thin wrapper over `redis::aio::ConnectionManager` so callers share one
//! reconnecting connection instead of holding raw clients.

use redis::{aio::ConnectionManager, AsyncCommands};

pub type Result<T> = std::result::Result<T, redis::RedisError>;

/// Redis client with automatic reconnection
#[derive(Clone)]
pub struct RedisClient {
    conn: ConnectionManager,
}

impl RedisClient {
    /// Connect to a Redis server
    ///
    /// Supports both redis:// and rediss:// (TLS) URLs
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Clone of the underlying connection manager (for scripts and
    /// pipelines that need `ConnectionLike` directly)
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// INCR - Increment integer value
    pub async fn incr(&mut self, key: &str) -> Result<i64> {
        self.conn.incr(key, 1).await
    }

    /// TTL - Get time to live in seconds
    pub async fn ttl(&mut self, key: &str) -> Result<i64> {
        self.conn.ttl(key).await
    }

    /// DEL - Delete one or more keys
    pub async fn del(&mut self, key: &str) -> Result<i64> {
        self.conn.del(key).await
    }

    /// Build a Lua script handle
    pub fn create_script(code: &str) -> redis::Script {
        redis::Script::new(code)
    }
}
