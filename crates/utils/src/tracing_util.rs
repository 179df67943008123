//! Helpers related to tracing, used by tests and by consumers that do not
//! install their own subscriber.

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize tracing with the default configuration; the `RUST_LOG`
/// environment variable overrides the filter. Safe to call more than once
/// (later calls are no-ops).
pub fn initialize_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let r = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
    if r.is_err() {
        tracing::trace!("tracing already initialized");
    }
}
