//! Tracing subscriber setup
//!
//! Logs always go to stderr: stdout carries the JSON output of the CLI.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Filter from `RUST_LOG`, or the configured level when unset or invalid
fn filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global subscriber
///
/// A second call leaves the first subscriber in place.
pub fn init_logging(config: &LoggingConfig) {
    let registry = tracing_subscriber::registry().with(filter(config));

    let installed = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    match installed {
        Ok(()) => tracing::debug!(level = %config.level, format = ?config.format, "Logging initialized"),
        Err(e) => tracing::debug!(error = %e, "Logging already initialized"),
    }
}
