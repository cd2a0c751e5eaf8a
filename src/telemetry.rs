//! Tracing subscriber setup
//!
//! Library code only emits `tracing` events; installing a subscriber is
//! left to the embedding application, which can use this helper.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Install a global subscriber for the given logging settings
///
/// `RUST_LOG` overrides the configured level. Returns `false` when a
/// global subscriber was already installed.
pub fn init_tracing(logging: &LoggingConfig) -> bool {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("recordcache={}", logging.level).into());

    let result = if logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
    };

    match result {
        Ok(()) => {
            tracing::info!(format = %logging.format, level = %logging.level, "Tracing initialized");
            true
        }
        Err(_) => false,
    }
}
