//! One-time tracing setup for embedders without their own subscriber.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install a fmt subscriber filtered by `RUST_LOG`, or `level` when unset.
/// Later calls, and calls after another subscriber was installed, do nothing.
pub fn init(level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_err() {
            tracing::debug!("Tracing subscriber already installed");
        }
    });
}
