//! Logging initialisation via tracing-subscriber.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `[logging].level`;
/// an unparsable level falls back to `info`. Logs go to stderr so CLI
/// output on stdout stays clean.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // A second init (e.g. in tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
