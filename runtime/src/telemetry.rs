//! Tracing subscriber setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` (typically
/// [`QueueConfig::log_level`](crate::config::QueueConfig::log_level)) applies.
///
/// # Errors
///
/// Returns [`TryInitError`] if a global subscriber is already installed.
pub fn init_tracing(default_level: &str) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer())
        .try_init()
}
