//! Tracing setup for binaries and long-running hosts.
//!
//! The library itself only emits `tracing` events; installing a subscriber is left to the
//! application. `RUST_LOG` takes precedence over the default directive.

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

/// Install a formatted subscriber filtered by `RUST_LOG`, or by `default_directive` when
/// the variable is unset.
pub fn init_tracing(default_directive: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive)
            .with_context(|| format!("invalid log directive '{default_directive}'"))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}
