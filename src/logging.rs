//! Tracing setup for the binary.
//!
//! Logs go to stderr so the human report on stdout stays clean.
//! Default level: `warn` globally, `info` for this crate; override with
//! `RUST_LOG` (e.g. `RUST_LOG=tfmigrate=debug`).

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "warn,tfmigrate=info";

/// Initialize the global subscriber. `verbose` raises the crate to `debug`
/// when `RUST_LOG` is not set.
pub fn init(verbose: bool) {
    let fallback = if verbose {
        "warn,tfmigrate=debug"
    } else {
        DEFAULT_FILTER
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init();

    tracing::debug!("Tracing initialized");
}
