//! Data layer module
//!
//! Handles persistence and caching primitives:
//! - SQLite database operations
//! - Cache clients (in-memory, optionally Redis)
//! - Record capabilities and hooks

mod cache;
mod database;
mod models;
#[cfg(feature = "redis")]
mod redis_cache;

pub use cache::{CacheClient, MemoryCache, link_key, record_key};
pub use database::Database;
pub use models::{HookContext, HookKind, Record, RecordHooks, now_cst};

#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;

#[cfg(test)]
pub(crate) use cache::MockCacheClient;
