use std::sync::Once;

static INIT: Once = Once::new();

/// Initializes `tracing` once per test binary, controlled by `TEST_LOG`
/// (e.g. `TEST_LOG=debug`). Off by default so normal test runs stay quiet.
pub fn trace_init() {
    INIT.call_once(|| {
        let filter = std::env::var("TEST_LOG").unwrap_or_else(|_| "off".to_string());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
