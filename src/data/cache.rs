//! Key-value cache clients
//!
//! The accessor talks to its cache through `CacheClient`, which stores
//! opaque bytes under string keys with a per-entry TTL.
//! `MemoryCache` is an in-process backend built on Moka.

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Result;

/// Cache service consumed by the accessor
///
/// `get` reports an absent entry as `Ok(None)`; every other failure is
/// an error. A zero TTL keeps the entry until it is deleted.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    async fn del(&self, key: &str) -> Result<()>;
}

// =============================================================================
// Keys
// =============================================================================

/// Primary record key: `{prefix}id:{id}`
pub fn record_key(prefix: &str, id: u64) -> String {
    format!("{}id:{}", prefix, id)
}

/// Link key: `{prefix}{link_type}:{field}`
pub fn link_key(prefix: &str, link_type: &str, field: &str) -> String {
    format!("{}{}:{}", prefix, link_type, field)
}

// =============================================================================
// Memory Cache
// =============================================================================

#[derive(Clone)]
struct CacheEntry {
    bytes: Arc<[u8]>,
    ttl: Duration,
}

/// Expiry policy reading the TTL stored with each entry
struct EntryTtl;

impl EntryTtl {
    fn lifetime(entry: &CacheEntry) -> Option<Duration> {
        if entry.ttl.is_zero() {
            None
        } else {
            Some(entry.ttl)
        }
    }
}

impl Expiry<String, CacheEntry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Self::lifetime(value)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Self::lifetime(value)
    }
}

/// In-process cache (volatile, cleared on restart)
///
/// Each entry expires after the TTL it was written with.
/// LRU eviction when capacity is reached.
pub struct MemoryCache {
    /// Key -> bytes
    entries: Cache<String, CacheEntry>,
}

impl MemoryCache {
    /// Create new memory cache
    ///
    /// # Arguments
    /// * `max_capacity` - Maximum number of entries to keep
    pub fn new(max_capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryTtl)
            .build();

        Self { entries }
    }

    /// Number of live entries (approximate until pending tasks run)
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }

    /// Flush Moka's pending maintenance so counts and expiry are current
    pub async fn sync(&self) {
        self.entries.run_pending_tasks().await;
    }
}

#[async_trait]
impl CacheClient for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).await.map(|entry| entry.bytes.to_vec()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let entry = CacheEntry {
            bytes: Arc::from(value),
            ttl,
        };
        self.entries.insert(key.to_string(), entry).await;

        // Update cache size metric
        use crate::metrics::CACHE_SIZE;
        CACHE_SIZE
            .with_label_values(&["memory"])
            .set(self.entries.entry_count() as i64);

        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.invalidate(key).await;
        Ok(())
    }
}
