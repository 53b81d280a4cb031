//! Main entry point for the hourglass server.
//!
//! Loads configuration, builds the cooldown gate, restores persisted state,
//! and serves the admin console until `quit` or a shutdown signal.

use std::sync::Arc;

use hourglass_engine::{CooldownGate, CooldownPlugin, PluginRegistry, start_prune_task};
use hourglass_server::{
    Configuration,
    console::{Console, ConsoleExit},
    startup,
};
use tokio::io::BufReader;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let configuration = Configuration::new()?;
    let _logging_guard = startup::init_logging(&configuration.logging_config())?;

    info!(
        "Starting hourglass with configuration {}",
        configuration.config_file().display()
    );

    // Engine
    let cooldown_config = configuration.cooldown_config()?;
    let (gate, report) = CooldownGate::from_config(&cooldown_config)?;
    for skipped in &report.skipped {
        warn!("Skipped cooldown entry: {}", skipped);
    }
    info!(
        "Loaded {} cooldown rules and {} groups",
        report.rules_loaded, report.groups_loaded
    );
    let gate = Arc::new(gate.with_permissions(Arc::new(configuration.permissions())));

    // Lifecycle: restore persisted cooldowns
    let mut registry = PluginRegistry::new();
    registry.register(Box::new(CooldownPlugin::new(gate.clone())));
    registry.init_all().await?;

    let prune_handle = start_prune_task(gate.clone(), configuration.prune_interval_seconds());
    let shutdown = startup::wait_for_shutdown_signal().await;
    let mut shutdown_rx = shutdown.subscribe();

    let console = Console::new(gate.clone(), configuration);
    let exit = console
        .run(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            shutdown.clone(),
        )
        .await;

    match exit {
        Ok(ConsoleExit::InputClosed) => {
            info!("Running without console input, waiting for shutdown signal");
            let _ = shutdown_rx.recv().await;
        }
        Ok(_) => {}
        Err(e) => error!("Console failed: {}", e),
    }

    prune_handle.abort();
    if let Err(e) = registry.shutdown_all().await {
        error!("Shutdown error: {}", e);
    }

    info!("hourglass stopped");
    Ok(())
}
