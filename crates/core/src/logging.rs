//! Structured logging infrastructure for Meshforge.
//!
//! This module provides centralized logging initialization with support
//! for structured JSON output and environment-based configuration. Logs go
//! to stderr so command output on stdout stays machine readable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directive used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize the logging system with structured output.
///
/// Log level can be configured via the `RUST_LOG` environment variable.
/// If not set, defaults to `info` level.
///
/// # Example
/// ```no_run
/// use meshforge_core::logging;
///
/// logging::init();
/// tracing::info!("Provisioner started");
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true),
        )
        .init();
}

/// Initialize the logging system with JSON output for production environments.
///
/// This format is suitable for log aggregation systems and structured log analysis.
/// Log level can be configured via the `RUST_LOG` environment variable.
///
/// # Example
/// ```no_run
/// use meshforge_core::logging;
///
/// logging::init_json();
/// tracing::info!(domain = "office", "Domain created");
/// ```
pub fn init_json() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true),
        )
        .init();
}

/// Pick between [`init`] and [`init_json`].
pub fn init_with(json: bool) {
    if json {
        init_json();
    } else {
        init();
    }
}
