//! Logging Infrastructure
//!
//! Structured logging setup with support for both development and production
//! environments. Console output only; the sync daemon has no log files of its
//! own, the registries are the system of record.

use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, prelude::*};

/// Initialize the logging system
///
/// # Arguments
/// * `level` - Log level (e.g., "info", "debug", "warn")
/// * `json_format` - Whether to use JSON format (true for production, false for development)
///
/// # Examples
/// ```ignore
/// // Development setup
/// init_logger("debug", false)?;
///
/// // Production setup
/// init_logger("info", true)?;
/// ```
pub fn init_logger(level: &str, json_format: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if json_format {
        // JSON format for production
        let console_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_filter(EnvFilter::new(level));

        subscriber.with(console_layer).init();
    } else {
        // Pretty format for development
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_filter(EnvFilter::new(level));

        subscriber.with(console_layer).init();
    }

    Ok(())
}
