//! RecordCache - cache-aside record access over SQLite
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Service Layer                            │
//! │  - RecordAccessor: create / update / save / fetch / delete  │
//! │  - Link resolver: field value -> id -> record               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx)                                            │
//! │  - Cache clients (Moka in-memory, Redis)                    │
//! │  - Record / hook capabilities                               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads populate the cache on miss; writes invalidate the cached row
//! and every link derived from it. Nothing is ever updated in place.
//!
//! # Modules
//!
//! - `service`: Record accessor and link resolver
//! - `data`: Database, cache clients and record traits
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments
//! - `telemetry`: Tracing subscriber setup

pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod service;
pub mod telemetry;

pub use config::AccessorSettings;
pub use data::{CacheClient, Database, HookContext, MemoryCache, Record, RecordHooks};
pub use error::{ModelError, Result};
pub use service::{LinkFinder, LinkRegistry, RecordAccessor};

use std::sync::Arc;

/// Shared handles built from configuration
///
/// Cloned freely; every accessor built from it shares the same pool
/// and cache client.
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// Cache client for the configured backend
    pub cache: Arc<dyn data::CacheClient>,
}

impl AppState {
    /// Initialize shared handles
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Connect the configured cache backend
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self> {
        tracing::info!("Initializing record cache state...");

        // 1. Connect to SQLite database
        let db = data::Database::connect(
            &config.database.path,
            config.database.max_connections,
        )
        .await?;

        // 2. Connect cache backend
        let cache: Arc<dyn data::CacheClient> = match config.cache.backend {
            config::CacheBackend::Memory => {
                Arc::new(data::MemoryCache::new(config.cache.max_capacity))
            }
            config::CacheBackend::Redis => Self::connect_redis(&config.cache).await?,
        };
        tracing::info!(backend = ?config.cache.backend, "Cache initialized");

        Ok(Self {
            config: Arc::new(config),
            db: Arc::new(db),
            cache,
        })
    }

    #[cfg(feature = "redis")]
    async fn connect_redis(cache: &config::CacheConfig) -> Result<Arc<dyn data::CacheClient>> {
        let url = cache.redis_url.as_deref().ok_or_else(|| {
            ModelError::Config("cache.redis_url is required when cache.backend=redis".to_string())
        })?;
        Ok(Arc::new(data::RedisCache::connect(url).await?))
    }

    #[cfg(not(feature = "redis"))]
    async fn connect_redis(_cache: &config::CacheConfig) -> Result<Arc<dyn data::CacheClient>> {
        Err(ModelError::Config(
            "cache.backend=redis requires the `redis` feature".to_string(),
        ))
    }

    /// Accessor for `R` using the configured cache settings
    pub fn accessor<R: Record>(&self) -> RecordAccessor<R> {
        RecordAccessor::with_cache(
            self.db.clone(),
            self.cache.clone(),
            self.config.cache.accessor_settings(),
        )
    }

    /// Accessor for `R` whose keys start with `cache.prefix` + `prefix`
    ///
    /// Keeps ids of different record types apart in a shared cache.
    pub fn accessor_with_prefix<R: Record>(&self, prefix: &str) -> RecordAccessor<R> {
        let mut settings = self.config.cache.accessor_settings();
        settings.prefix.push_str(prefix);
        RecordAccessor::with_cache(self.db.clone(), self.cache.clone(), settings)
    }
}
