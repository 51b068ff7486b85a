// Logging setup for the CLI
//
// Core library code only emits `tracing` events; the binary decides where
// they go. RUST_LOG overrides the default `info` filter, e.g.
// `RUST_LOG=examops_core=debug`.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. Call once, at startup.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Verbose subscriber for tests; safe to call repeatedly
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
