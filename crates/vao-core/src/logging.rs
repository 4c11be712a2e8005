//! Structured logging via the `tracing` ecosystem
//!
//! The simulator logs lifecycle events at info, recoverable protocol
//! trouble (bad commands, dropped packets, late transmits) at warn. Call
//! [`init_logging`] once at startup; `RUST_LOG` overrides the configured
//! level as usual.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, one line per event.
    #[default]
    Compact,
    /// Machine-readable JSON.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default filter directive, e.g. `"info"` or `"vao_sim=debug"`.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
    /// Include thread names (the scheduler and daemon threads are named).
    pub thread_names: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Compact,
            thread_names: true,
        }
    }
}

/// Initialize the global logging subscriber.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter.clone()));

    let result = match config.format {
        LogFormat::Compact => tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .compact()
                    .with_thread_names(config.thread_names),
            ),
        ),
        LogFormat::Json => tracing::subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_thread_names(config.thread_names)),
        ),
    };
    // A subscriber may already be installed (tests, embedding apps).
    let _ = result;
}
