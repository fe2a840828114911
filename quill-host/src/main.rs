//! # quill-host
//!
//! The quill host daemon.
//!
//! This daemon is responsible for:
//! - Discovering and compiling JavaScript plugins
//! - Running each plugin's `Config` and `Init` entry points
//! - Dispatching requests to the handlers plugins registered
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        quill-host                         │
//! │                                                           │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐    │
//! │  │   Plugin     │  │    Hook      │  │   Resource   │    │
//! │  │   Manager    │  │   Registry   │  │     Tree     │    │
//! │  └──────────────┘  └──────────────┘  └──────────────┘    │
//! │                                                           │
//! │  ┌─────────────────────────────────────────────────┐     │
//! │  │         Execution context pool (QuickJS)         │     │
//! │  └─────────────────────────────────────────────────┘     │
//! └──────────────────────────────────────────────────────────┘
//!                             │
//!                     JSON-RPC (TCP)
//! ```
//!
//! ## Configuration
//!
//! The host reads configuration from `$XDG_CONFIG_HOME/quill/config.toml`.
//!
//! ## Running
//!
//! ```bash
//! # Start the host
//! cargo run --bin quill-host
//!
//! # With debug logging
//! RUST_LOG=debug cargo run --bin quill-host
//! ```

use anyhow::{Context, Result};
use quill_host::config::HostConfig;
use quill_host::host::Host;
use quill_host::api;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration before logging so its log level applies
    let (config, load_error) = match HostConfig::load_default() {
        Ok(cfg) => (cfg, None),
        Err(e) => (HostConfig::default(), Some(e)),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.host.log_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("Starting quill-host v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => info!("Loaded configuration from default path"),
        Some(e) => info!("Failed to load config, using defaults: {:#}", e),
    }

    let bind_address = config.host.bind_address.clone();
    let host = tokio::task::spawn_blocking(move || -> Result<Host> {
        let mut host = Host::new(config)?;
        host.start()?;
        Ok(host)
    })
    .await
    .context("Host startup task failed")??;

    for plugin in host.list_plugins() {
        info!(
            "Plugin: {} v{} ({})",
            plugin.name,
            plugin.version.as_deref().unwrap_or("0.0.0"),
            plugin.state
        );
    }
    for route in host.routes() {
        info!("Route: {} {} ({:?})", route.method, route.path, route.visibility);
    }

    let (server_handle, addr) = api::start_server(Arc::new(host), &bind_address).await?;

    info!("Host startup complete");
    info!("Listening on: {}", addr);
    info!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    server_handle.stop()?;

    info!("Host stopped");
    Ok(())
}
