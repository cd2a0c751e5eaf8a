//! Redis cache client
//!
//! Shares cached rows and links across processes. Keys are written
//! exactly as the accessor builds them.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;

use super::cache::CacheClient;
use crate::error::Result;

/// Redis-backed `CacheClient`
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `url` - Connection URL, e.g. `redis://127.0.0.1:6379/0`
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;

        tracing::info!("Redis cache connected");

        Ok(Self { manager })
    }
}

#[async_trait]
impl CacheClient for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        if ttl.is_zero() {
            conn.set::<_, _, ()>(key, value).await?;
        } else {
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
            conn.pset_ex::<_, _, ()>(key, value, millis).await?;
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}
