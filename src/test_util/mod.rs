//! Helpers shared by unit and integration tests.

mod transport;
pub mod tls;

use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt};

pub use self::transport::FakeTransport;

static INIT: Once = Once::new();

/// Installs a test-friendly subscriber once per process. Filtering follows `RUST_LOG`, defaulting
/// to `warn`.
pub fn trace_init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
