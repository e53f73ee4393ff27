//! Tracing setup for the daemon.
//!
//! Ticket comments are the user-facing record of what the engine did; tracing
//! output is operator diagnostics only and goes to stderr.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `info`. Compact format on stderr.
///
/// # Example
/// ```bash
/// RUST_LOG=autopilot=debug autopilot loop
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
