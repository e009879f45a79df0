//! Logging initialization and configuration.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the logging system with tracing.
///
/// `RUST_LOG` takes precedence; otherwise `default_filter` (usually the
/// `[logging] filter` value of the engine config) is used.
///
/// Returns `false` when a global subscriber was already installed, in which
/// case that subscriber and its filter stay in effect.
///
/// # Example
/// ```
/// deferred_core::init_logging("info");
/// tracing::info!("Renderer initialized");
/// ```
pub fn init_logging(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    match tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init()
    {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("Logging filter '{}' ignored: {}", default_filter, e);
            false
        }
    }
}
