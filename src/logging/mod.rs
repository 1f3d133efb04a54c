//! Logging initialization for beacond
//!
//! Structured logging through `tracing`, filtered by `RUST_LOG` when set.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// `default_level` is used when `RUST_LOG` is absent; `--verbose` on the CLI
/// raises it to `debug`.
pub fn init(default_level: &str, verbose: bool) {
    let default_directive = if verbose { "debug" } else { default_level };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
