use std::sync::Arc;

use anyhow::{Context, Result};
use molt::{ListenerRegistry, RestartCoordinator, SignalController};
use tracing::info;

mod config;
mod server;
mod telemetry;

use config::ServerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init().map_err(|e| anyhow::anyhow!("Failed to init telemetry: {}", e))?;

    info!(pid = std::process::id(), "Molt Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let server_config = ServerConfig::load().context("Failed to load server configuration")?;
    server_config.log_config();
    let config = Arc::new(server_config.process_config());

    // Registered before bootstrap: the default SIGHUP action terminates the process.
    let signals = molt::signal_queue().context("Failed to register signal handlers")?;

    // Inherit the listener from a predecessor mid-restart, or bind fresh.
    let registry = ListenerRegistry::acquire(config)
        .await
        .context("Failed to acquire listener")?;

    let server = server::start(&registry)?;

    let exit = SignalController::new(RestartCoordinator::new(registry))
        .run(signals, server)
        .await;

    info!(
        pid = std::process::id(),
        reason = ?exit.reason,
        drained = exit.drained,
        "Shutdown lifecycle complete"
    );

    Ok(())
}
