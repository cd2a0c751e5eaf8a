//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)
//!
//! Embedding applications that wire handles themselves only need
//! `AccessorSettings`.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ModelError;

/// Main configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
    /// Pool size (default: 5)
    pub max_connections: u32,
}

/// Cache backend selector
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
}

/// Cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Serve reads through the cache and invalidate on writes
    pub enabled: bool,
    /// Prepended to every cache key (e.g. "app:user:")
    pub prefix: String,
    /// Record entry TTL in seconds; 0 keeps entries until invalidated
    pub expire_seconds: u64,
    /// Backend to connect
    #[serde(default)]
    pub backend: CacheBackend,
    /// Maximum entries held by the memory backend (default: 10000)
    pub max_capacity: u64,
    /// Redis connection URL, required for the redis backend
    pub redis_url: Option<String>,
}

impl CacheConfig {
    /// Settings consumed by `RecordAccessor`
    pub fn accessor_settings(&self) -> AccessorSettings {
        AccessorSettings {
            use_cache: self.enabled,
            prefix: self.prefix.clone(),
            expire: Duration::from_secs(self.expire_seconds),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Cache behavior of a single `RecordAccessor`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessorSettings {
    /// Route record reads and writes through the cache
    pub use_cache: bool,
    /// Key prefix, usually one per record type
    pub prefix: String,
    /// TTL of cached records
    pub expire: Duration,
}

impl AccessorSettings {
    /// Cache-enabled settings
    pub fn cached(prefix: impl Into<String>, expire: Duration) -> Self {
        Self {
            use_cache: true,
            prefix: prefix.into(),
            expire,
        }
    }
}

impl Default for AccessorSettings {
    fn default() -> Self {
        Self {
            use_cache: false,
            prefix: String::new(),
            expire: Duration::ZERO,
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (RECORDCACHE__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, ModelError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("database.path", "data/recordcache.db")?
            .set_default("database.max_connections", 5)?
            .set_default("cache.enabled", true)?
            .set_default("cache.prefix", "")?
            .set_default("cache.expire_seconds", 3600)?
            .set_default("cache.backend", "memory")?
            .set_default("cache.max_capacity", 10_000)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (RECORDCACHE__*)
            .add_source(
                Environment::with_prefix("RECORDCACHE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app_config: Self = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.cache.backend == CacheBackend::Redis
            && self
                .cache
                .redis_url
                .as_deref()
                .map(str::trim)
                .is_none_or(str::is_empty)
        {
            return Err(ModelError::Config(
                "cache.redis_url is required when cache.backend=redis".to_string(),
            ));
        }

        if self.cache.backend == CacheBackend::Memory && self.cache.max_capacity == 0 {
            return Err(ModelError::Config(
                "cache.max_capacity must be greater than 0".to_string(),
            ));
        }

        if self.cache.enabled && self.cache.prefix.is_empty() {
            tracing::warn!("cache.prefix is empty; keys of different record types may collide");
        }

        Ok(())
    }
}
