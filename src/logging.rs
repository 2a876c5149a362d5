//! Logging setup helpers
//!
//! With the default `logging` feature the registry emits `tracing` events
//! under the `keyed_registry` target; any subscriber the host program
//! installs will receive them. The helpers here install a subscriber for
//! programs that do not configure their own, honoring `RUST_LOG` when set.
//!
//! Enable `logging-pretty` for colorful development output or
//! `logging-json` for structured production output.

use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keyed_registry=debug"))
}

/// Install a pretty-printing subscriber. No-op when a global subscriber is
/// already set.
#[cfg(feature = "logging-pretty")]
pub fn init_pretty() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .pretty()
        .try_init()
        .ok();
}

/// Install a compact single-line subscriber. No-op when a global subscriber
/// is already set.
#[cfg(feature = "logging-pretty")]
pub fn init_compact() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .compact()
        .try_init()
        .ok();
}

/// Install a JSON subscriber. No-op when a global subscriber is already set.
#[cfg(feature = "logging-json")]
pub fn init_json() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .json()
        .try_init()
        .ok();
}
