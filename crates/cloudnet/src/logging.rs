//! Process-wide `tracing` subscriber.

use tracing_subscriber::EnvFilter;

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the fmt subscriber, filtered by `RUST_LOG` (default `info`).
/// Does nothing if a global subscriber is already set.
pub fn init() {
    try_init().ok();
}

pub fn try_init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter(filter()).with_target(false).compact().try_init()
}
