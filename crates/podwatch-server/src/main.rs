//! # podwatch-server
//!
//! HTTP server for podwatch, the Smart Diaper Pod monitor.
//!
//! This binary provides:
//! - REST API for live pod status, connection control, history and configuration
//! - OpenAPI specification at `/api/openapi.json`
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development, against the simulated pod
//! cargo run --package podwatch-server
//!
//! # Production
//! PODWATCH_ENV=production PODWATCH_CONFIG=/etc/podwatch/config.toml ./podwatch-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use podwatch_core::PodConfig;
use podwatch_server::{api, logging, state::AppState};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Load configuration from `PODWATCH_CONFIG` or the default location.
fn load_config() -> anyhow::Result<(PodConfig, Option<PathBuf>)> {
    if let Some(path) = std::env::var_os("PODWATCH_CONFIG").map(PathBuf::from) {
        let config = PodConfig::load_from(&path)
            .with_context(|| format!("loading config from {}", path.display()))?;
        return Ok((config, Some(path)));
    }

    let config = PodConfig::load().context("loading default config")?;
    Ok((config, Some(PodConfig::default_path())))
}

#[cfg(feature = "simulator")]
fn build_state(config: PodConfig, config_path: Option<PathBuf>) -> anyhow::Result<AppState> {
    info!("Using simulated pod link");
    Ok(AppState::simulated(config, config_path))
}

#[cfg(not(feature = "simulator"))]
fn build_state(_config: PodConfig, _config_path: Option<PathBuf>) -> anyhow::Result<AppState> {
    anyhow::bail!("no device link available: rebuild with the `simulator` feature")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let is_production = std::env::var("PODWATCH_ENV").is_ok_and(|env| env == "production");
    let (config, config_path) = load_config()?;
    logging::init(&config.logging, is_production)?;

    info!(
        production = is_production,
        config = ?config_path,
        "Starting podwatch-server"
    );

    let addr: SocketAddr = config
        .server
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind_address))?;

    let state = build_state(config, config_path)?;
    let app = api::create_router(state.clone());

    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    info!("podwatch-server stopped");
    Ok(())
}

/// Wait for ctrl-c, then release the pod link.
async fn shutdown_signal(state: AppState) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown requested");
    state.monitor().disconnect().await;
}
