//! Logging setup for the server.
//!
//! Environment variables:
//! - `RUST_LOG`: log filter (default: `info,molt=debug,molt_server=debug`)
//! - `MOLT_LOG_FORMAT`: `json` for JSON lines, anything else for plain text

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,molt=debug,molt_server=debug";

/// Initialize the global tracing subscriber.
///
/// Can only be called once per process.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json = std::env::var("MOLT_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // Parent and successor share the inherited stderr during a handoff.
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(true)
                    .with_line_number(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    tracing::info!(pid = std::process::id(), "Telemetry initialized");
    Ok(())
}
