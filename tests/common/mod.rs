//! Shared helpers for the integration test binaries

use tracing_subscriber::EnvFilter;

/// Install a per-test tracing subscriber, once per test binary
///
/// Honors `RUST_LOG` when set; output goes through the test writer so it
/// only shows for failing tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dokimi=debug")),
        )
        .with_test_writer()
        .try_init();
}
