//! Tracing initialization for the trove daemon.
//!
//! Human-readable logs go to stdout through the `fmt` layer. `RUST_LOG`
//! takes precedence over the `[log] level` config value.

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber.
///
/// Call this once at startup, before any `tracing` events are emitted.
pub fn init(level: &str) {
    tracing_subscriber::fmt().with_env_filter(filter(level)).init();
}

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|e| {
            eprintln!("invalid log level {level:?}: {e}, falling back to info");
            EnvFilter::new("info")
        })
}
