//! ABOUTME: Logging infrastructure and tracing initialization
//! ABOUTME: Provides env-filtered subscriber setup for binaries and tests

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize structured logging with `RUST_LOG`-style filtering.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
