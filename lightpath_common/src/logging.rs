//! Tracing subscriber setup.
//!
//! Library code only emits `tracing` events; whoever embeds lightpath calls
//! [`init_tracing`] once to route them to stdout.

use crate::config::LogLevel;
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set. With `json`, events are
/// written as JSON lines. Returns `false` if a global subscriber was already
/// installed, which leaves the existing one in place.
pub fn init_tracing(level: LogLevel, json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .is_ok()
    }
}
