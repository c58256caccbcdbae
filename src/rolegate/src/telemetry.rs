//! Tracing subscriber setup for embedders

use crate::config::LoggingConfig;
use crate::error::{AuthzError, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install a global subscriber; `RUST_LOG` takes precedence over `config.level`
///
/// Fails when a global subscriber is already installed.
pub fn try_init_tracing(config: &LoggingConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(filter(config))
        .with(tracing_subscriber::fmt::layer().with_ansi(config.ansi))
        .try_init()
        .map_err(|e| AuthzError::Config(format!("failed to install tracing subscriber: {}", e)))
}

/// Like [`try_init_tracing`], ignoring an already installed subscriber
pub fn init_tracing(config: &LoggingConfig) {
    if try_init_tracing(config).is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
