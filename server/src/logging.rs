//! Subscriber setup. `log` records from dependencies are bridged into
//! `tracing` so everything goes through one filter.

use mediagen::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter '{filter}': {reason}")]
    Filter { filter: String, reason: String },

    #[error("failed to install log bridge: {0}")]
    Bridge(String),

    #[error("failed to install subscriber: {0}")]
    Subscriber(String),
}

/// `RUST_LOG` wins over the configured level.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    tracing_log::LogTracer::init().map_err(|e| LoggingError::Bridge(e.to_string()))?;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| LoggingError::Filter {
            filter: config.level.clone(),
            reason: e.to_string(),
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Pretty => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_target(true).with_level(true)),
        ),
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_current_span(true)),
        ),
    };
    result.map_err(|e| LoggingError::Subscriber(e.to_string()))
}
