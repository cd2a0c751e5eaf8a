//! Error types for RecordCache
//!
//! Every fallible operation in the crate returns `ModelError`.
//! Store and cache failures propagate unchanged; the cache-miss
//! sentinel never leaves the read path.

use thiserror::Error;

/// Crate-wide error type
#[derive(Debug, Error)]
pub enum ModelError {
    /// Relational store failure, including `RowNotFound`
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Cache backend failure other than "entry absent"
    #[error("Cache error: {0}")]
    Cache(String),

    /// Cache entry absent
    ///
    /// Produced by the primary cache lookup and consumed by the
    /// read-through path, which falls back to the store.
    #[error("Cache miss")]
    CacheMiss,

    /// Unknown link type, missing parameter or invalid settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Record could not be encoded to or decoded from its cached form
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failure reported by a record hook
    #[error("Hook error: {0}")]
    Hook(#[from] anyhow::Error),
}

impl ModelError {
    /// Whether the store found no matching row
    pub fn is_not_found(&self) -> bool {
        matches!(self, ModelError::Database(sqlx::Error::RowNotFound))
    }

    /// Whether this is the "entry absent" cache sentinel
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, ModelError::CacheMiss)
    }

    /// Label used by the error counter
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            ModelError::Database(sqlx::Error::RowNotFound) => "not_found",
            ModelError::Database(_) => "database",
            ModelError::Cache(_) => "cache",
            ModelError::CacheMiss => "cache_miss",
            ModelError::Config(_) => "config",
            ModelError::Serialization(_) => "serialization",
            ModelError::Hook(_) => "hook",
        }
    }

    pub(crate) fn missing_parameter(operation: &str, parameter: &str) -> Self {
        ModelError::Config(format!("{operation}: missing parameter {parameter}"))
    }
}

impl From<config::ConfigError> for ModelError {
    fn from(err: config::ConfigError) -> Self {
        ModelError::Config(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for ModelError {
    fn from(err: redis::RedisError) -> Self {
        ModelError::Cache(err.to_string())
    }
}

/// Result type alias using ModelError
pub type Result<T> = std::result::Result<T, ModelError>;
