//! # Clearnet Bridge Runtime
//!
//! Entry point of the bridge process.
//!
//! ## Startup Sequence
//!
//! 1. Initialize logging (`TUNNEL_LOG`, then `RUST_LOG`, default `info`)
//! 2. Load configuration (defaults → `TUNNEL_CONFIG` file → env overrides)
//! 3. Connect to the overlay and bootstrap the gateway service
//! 4. Start the ingestion, publication and stats loops
//! 5. Serve the admin API
//! 6. Run until ctrl-c or until the overlay connection drops

mod config;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use tunnel_gateway::{GatewayError, LoopbackConnector, TunnelService, VERSION};

fn log_filter() -> EnvFilter {
    EnvFilter::try_from_env("TUNNEL_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter())
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("===========================================");
    info!("  Clearnet Bridge v{}", VERSION);
    info!("===========================================");

    // Load configuration
    let config = config::load_config()?;

    // Only the in-process overlay ships with the bridge for now
    let connector = LoopbackConnector::default();
    let mut service = TunnelService::bootstrap(config.clone(), &connector)
        .await
        .context("failed to bootstrap tunnel service")?;
    service.start();

    // Start Admin server
    let admin_handle = if config.admin.enabled {
        let addr = config.admin_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Bind(format!("{}: {}", addr, e)))?;
        info!(addr = %addr, "Starting Admin server");

        let router = service.admin_router();
        let mut stopping = service.shutdown_signal();
        Some(tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = stopping.wait_for(|stop| *stop).await;
                })
                .await
        }))
    } else {
        None
    };

    // Keep the bridge running
    info!(queue = %service.queue().name(), "Bridge is running. Press Ctrl+C to stop.");
    let mut stopped = service.shutdown_signal();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("Received shutdown signal");
        }
        _ = stopped.wait_for(|stop| *stop) => {
            warn!("Tunnel service stopped, exiting");
        }
    }

    // Graceful shutdown
    service.shutdown().await;
    if let Some(handle) = admin_handle {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Admin server error"),
            Err(e) => error!(error = %e, "Admin server task failed"),
        }
    }

    Ok(())
}
