pub mod builders;
pub mod fakes;
pub mod harness;

use std::sync::Once;

use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Install the tracing subscriber for a test binary. Output goes through
/// the libtest capture, so it only appears for failing tests (or under
/// `--nocapture`); `RUST_LOG` selects levels as usual.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .init();
    });
}
