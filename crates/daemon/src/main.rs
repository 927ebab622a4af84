// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! gaffer daemon (gafferd)
//!
//! Background process that owns the run graph, lane scheduler, process
//! manager, and session supervisor. Exits 0 on clean shutdown.

use gaffer_core::Config;
use gaffer_daemon::{env, lifecycle, LifecycleError};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let config_path = env::config_path()?;
    let config = Config::load(&config_path)?;

    let state = match lifecycle::startup(config).await {
        Ok(state) => state,
        Err(e @ LifecycleError::LockFailed(_)) => {
            eprintln!("gafferd is already running");
            error!("{e}");
            std::process::exit(1);
        }
        Err(e) => {
            error!("failed to start daemon: {e}");
            return Err(e.into());
        }
    };

    info!("gafferd ready");

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }

    state.shutdown().await?;
    Ok(())
}
