//! # Charging Stations Push Server
//!
//! Serves live charging station status to WebSocket clients. Every client receives a
//! welcome message on connect, then one `station_update` per station list on every
//! tick, each list replayed circularly on its own timer.
//!
//! ## Execution Flow:
//! 1.  **Configuration**: defaults, `server_stations.conf`, `.env`, environment and CLI.
//! 2.  **Logging**: console plus an optional daily rolling JSON file.
//! 3.  **Dataset**: the configured JSON file, or the built-in sample.
//! 4.  **Services**: the liveness monitor and the HTTP/WebSocket listener.
//! 5.  **Shutdown**: on `CTRL+C` or `SIGTERM`, liveness stops first, then every client
//!     is closed, then the listener, and the process exits with status 0.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::info;

use lib_stations::configs::{load_config, ConfigError};
use lib_stations::core::{LivenessMonitor, ShutdownCoordinator, StreamContext};
use lib_stations::dataset::Dataset;
use lib_stations::loggers::{setup_logging, LogSettings};
use lib_stations::server;

const APP_NAME: &str = "server_stations";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = match load_config() {
        Ok(settings) => settings,
        // --help, --version and usage errors are printed by clap with its own exit code.
        Err(ConfigError::Cli(e)) => e.exit(),
        Err(e) => return Err(e).context("Invalid configuration"),
    };

    // Held until main returns so the file writer is flushed on exit.
    let _log_guard = setup_logging(&LogSettings {
        level: settings.log_level.clone(),
        dir: settings.log_dir.clone(),
        file_prefix: APP_NAME.to_string(),
    })
    .context("Failed to initialize logging")?;

    let dataset = match &settings.dataset_path {
        Some(path) => Dataset::from_path(path)
            .with_context(|| format!("Failed to load dataset {}", path.display()))?,
        None => Dataset::builtin().context("Built-in dataset is invalid")?,
    };
    info!(
        streams = dataset.stream_count(),
        tick_ms = settings.engine.tick_interval.as_millis() as u64,
        ping_ms = settings.engine.ping_interval.as_millis() as u64,
        "{} starting",
        APP_NAME
    );

    let ctx = StreamContext::new(Arc::new(dataset), settings.engine.clone());
    let liveness = LivenessMonitor::spawn(Arc::clone(&ctx.registry), ctx.settings.ping_interval);

    let running = match server::bind(settings.addr, Arc::clone(&ctx), settings.static_dir.clone()).await {
        Ok(running) => running,
        Err(e) => {
            let _ = liveness.stop().await;
            return Err(e).with_context(|| format!("Failed to bind {}", settings.addr));
        }
    };
    info!("WebSocket server ready on ws://{}/ws", running.local_addr);

    shutdown_signal().await?;

    ShutdownCoordinator::new(Arc::clone(&ctx.registry), liveness, running.transport)
        .run()
        .await
        .context("Shutdown did not complete cleanly")?;

    info!("{} stopped", APP_NAME);
    Ok(())
}

/// Resolves on the first `CTRL+C` or, on UNIX, `SIGTERM`.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;

    #[cfg(unix)]
    let terminate = async move {
        terminate.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        res = signal::ctrl_c() => {
            res.context("Failed to listen for CTRL+C")?;
            info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate => {
            info!("SIGTERM received, initiating shutdown.");
        }
    }
    Ok(())
}
