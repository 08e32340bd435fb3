//! Log output for the `shotlog` command.
//!
//! Scan progress, skipped logs and store appends are diagnostics, so they are
//! written to stderr. Tables, CSV and JSON reports printed on stdout can then
//! be piped or redirected without log lines mixed in.
//!
//! `-v` lowers the default level to `debug`, which also shows logs ignored for
//! being outside the results layout. `RUST_LOG` overrides the level, e.g.
//! `RUST_LOG=shotlog_core::locator=debug`. `--json` switches to one JSON
//! object per line for collection by a job scheduler.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the stderr subscriber. `level` applies when `RUST_LOG` is unset.
/// Only the first call in a process has any effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}
