//! Log output for the command line tools.
//!
//! The `RUST_LOG` environment variable takes precedence over the level
//! picked on the command line.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter for a given number of `-v` flags.  A single `-v` only
/// turns on the progress tables, so it stays at `info`.
pub fn default_filter(verbosity: u64) -> &'static str {
    match verbosity {
        0 | 1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

pub fn init(verbosity: u64) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_timer(fmt::time::uptime());

    // Ignore the error if a subscriber is already installed.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}
