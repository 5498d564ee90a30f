//! Tracing initialization. Every core module logs through `tracing`
//! macros rather than `println!`/`eprintln!`; this is the one entry
//! point that wires a subscriber up to stderr.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber with an `EnvFilter`. `verbose` raises the
/// default level from `INFO` to `DEBUG`; `RUST_LOG` always takes
/// precedence when set.
pub fn init(verbose: bool) {
    let default_level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let env_filter = EnvFilter::builder().with_default_directive(default_level.into()).from_env_lossy();

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}
