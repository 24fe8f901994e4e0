//! # checkin-agent
//!
//! Runs the beacon proximity pipeline for every configured instance until
//! SIGINT or SIGTERM.
//!
//! ## Running
//!
//! ```bash
//! # Configuration from $CHECKIN_CONFIG or the platform config dir
//! checkin-agent
//!
//! # Explicit configuration file
//! checkin-agent /etc/checkin/agent.toml
//! ```
//!
//! ## Environment Variables
//!
//! - `CHECKIN_CONFIG`: configuration file path
//! - `CHECKIN__*`: overrides of top-level settings, e.g. `CHECKIN__PRODUCTION=true`
//! - `CHECKIN_LOG_LEVEL` / `RUST_LOG`: log filter (default: info)

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use checkin_agent::config::{default_config_path, AgentConfig};
use checkin_agent::feed::pump_path;
use checkin_agent::logging;
use checkin_agent::state::AgentState;
use checkin_core::{FileStore, KeyValueStore};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(default_config_path);
    let config = AgentConfig::load(config_path.as_deref())
        .context("Failed to load agent configuration")?;

    logging::init(config.production)?;
    info!(
        instances = config.instances.len(),
        config = ?config_path,
        "Starting checkin-agent"
    );

    let data_dir = config.data_dir();
    info!(data_dir = %data_dir.display(), "Using data directory");
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(data_dir));

    let shutdown_rx = setup_signal_handlers();

    let state = AgentState::new();
    for instance in &config.instances {
        state
            .start_http_instance(instance, Arc::clone(&store))
            .await
            .with_context(|| format!("Failed to start instance '{}'", instance.name))?;
    }

    let mut feeds = JoinSet::new();
    for instance in &config.instances {
        let Some(path) = instance.feed.clone() else {
            continue;
        };
        let state = state.clone();
        let name = instance.name.clone();
        feeds.spawn(async move {
            if let Err(e) = pump_path(&path, &name, &state).await {
                error!(instance = %name, error = %e, "Feed failed");
            }
        });
    }

    info!("checkin-agent running");
    if shutdown_rx.await.is_err() {
        warn!("Signal handler ended unexpectedly, shutting down");
    }

    feeds.abort_all();
    for (name, result) in state.shutdown_all().await {
        match result {
            Ok(status) => info!(
                instance = %name,
                pending = status.pending_len,
                history = status.history_len,
                "Instance stopped"
            ),
            Err(e) => error!(instance = %name, error = %e, "Instance did not stop cleanly"),
        }
    }

    info!("checkin-agent shutdown complete");
    Ok(())
}

/// Resolve once SIGINT or SIGTERM (Ctrl+C off unix) arrives.
fn setup_signal_handlers() -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = tx.send(());
    });

    rx
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(mut sigint), Ok(mut sigterm)) => {
            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT, initiating shutdown..."),
                _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown..."),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "Failed to install signal handlers, falling back to Ctrl+C");
            wait_for_ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating shutdown..."),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}
