//! devctl server
//!
//! Device-control backend for a host's USB, Bluetooth, audio and camera
//! devices, served over HTTP.

use anyhow::{Context, Result};
use clap::Parser;
use common::{create_platform_bridge, setup_logging};
use server::config::{BackendKind, ServerConfig};
use server::platform::{create_backend, spawn_platform_workers};
use server::{ControlService, build_router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "devctl-server")]
#[command(author, version, about = "Device control server - USB, Bluetooth, audio and camera")]
#[command(long_about = "
Enumerates attached devices and performs device-changing operations
(disable/enable, eject, Bluetooth radio power, camera recording) behind
an HTTP API. At most one operation runs per device at a time.

EXAMPLES:
    # Run with default config
    devctl-server

    # Run against the in-memory device table
    devctl-server --simulate

    # List devices without starting the server
    devctl-server --list-devices

    # Listen on all interfaces with debug logging
    devctl-server --bind 0.0.0.0:5000 --log-level debug

CONFIGURATION:
    The server looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/devctl/server.toml
    3. /etc/devctl/server.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Use the simulated backend instead of the host OS
    #[arg(long)]
    simulate: bool,

    /// List devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Address to listen on (overrides server.bind_addr)
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = ServerConfig::default();
        let path = ServerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        ServerConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        ServerConfig::load_or_default()
    };
    if args.simulate {
        config.platform.backend = BackendKind::Simulated;
    }
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind.to_string();
    }

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.server.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("devctl server v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let (bridge, worker) = create_platform_bridge();
    let backend = create_backend(&config);
    let pool = spawn_platform_workers(worker, backend, config.platform.workers)
        .context("Failed to start platform workers")?;

    let service = Arc::new(ControlService::new(&config, bridge.clone()));

    let result = if args.list_devices {
        list_devices_mode(&service).await;
        Ok(())
    } else {
        run_server(&config, service.clone()).await
    };

    info!("Shutting down...");
    service.shutdown().await;
    if let Err(e) = pool.shutdown(&bridge).await {
        error!("Error shutting down platform workers: {:#}", e);
    }

    result
}

/// Print one enumeration and return
async fn list_devices_mode(service: &ControlService) {
    let snapshot = service.snapshot(true).await;

    if snapshot.is_empty() {
        println!("No devices found.");
    } else {
        println!("Found {} device(s):\n", snapshot.len());
        for device in snapshot.devices() {
            let ids = match (&device.vendor_id, &device.product_id) {
                (Some(vid), Some(pid)) => format!(" {}:{}", vid, pid),
                _ => String::new(),
            };
            println!(
                "  [{}] {}{} - {}",
                device.class, device.id, ids, device.display_name
            );
            if let Some(mount) = &device.mount_point {
                println!("      Mounted at: {}", mount);
            }
            if let Some(serial) = &device.serial_number {
                println!("      Serial: {}", serial);
            }
        }
        println!();
    }

    for class in snapshot.degraded() {
        println!("Warning: {} enumeration failed", class);
    }
}

/// Serve HTTP until Ctrl+C
async fn run_server(config: &ServerConfig, service: Arc<ControlService>) -> Result<()> {
    // Prime the cache so the first poll is served from memory
    let initial = service.snapshot(true).await;
    info!("Initial enumeration found {} devices", initial.len());

    let poller = service.spawn_poller();
    let app = build_router(service);

    let addr: SocketAddr = config
        .server
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid bind address: {}", config.server.bind_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "server listening");
    info!("Press Ctrl+C to shutdown");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed");

    if let Some(poller) = poller {
        poller.abort();
    }
    served
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
        Err(e) => error!("Error waiting for Ctrl+C: {}", e),
    }
}
