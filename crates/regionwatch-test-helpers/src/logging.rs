//! `tracing` subscriber setup for tests.

use tracing_subscriber::EnvFilter;

/// Install a test-writer `fmt` subscriber once per test binary.
///
/// The filter comes from `RUST_LOG`, defaulting to `regionwatch=debug`.
/// Later calls, and calls after another subscriber was installed, do nothing.
pub fn init_test_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("regionwatch=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
