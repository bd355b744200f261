//! livecast - WebRTC-to-HLS live streaming server.
//!
//! Ingests browser camera feeds over WebRTC, transcodes them into an
//! adaptive-bitrate HLS ladder, and publishes the output to object
//! storage for CDN delivery.

use std::sync::Arc;

use livecast::api::{ApiServer, AppState};
use livecast::config::AppConfig;
use livecast::logging::init_logging;
use livecast::stream::StreamRegistry;
use media_store::{MediaStore, StoreConfig};
use tracing::{error, info};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let _guard = init_logging(&log_dir)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting livecast v{}", env!("CARGO_PKG_VERSION"));

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Arc::new(AppConfig::from_env()?);

    let store = Arc::new(MediaStore::gcs(&StoreConfig {
        bucket: config.storage.bucket.clone(),
        credentials_path: config.storage.credentials_path.clone(),
        public_base: config.storage.public_base.clone(),
    })?);
    info!(bucket = %config.storage.bucket, "Object store ready");

    let registry = StreamRegistry::new(Arc::clone(&config), Arc::clone(&store));

    let state = AppState::new(Arc::clone(&config), Arc::clone(&registry), store);
    let server = Arc::new(ApiServer::with_state(config.server.clone(), state));

    let server_task = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("API server error: {}", e);
            }
        })
    };

    info!("livecast started successfully");

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), initiating shutdown...");
        }
        _ = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Graceful shutdown: stop every live pipeline, then the server.
    info!("Stopping live streams...");
    registry.stop_all().await;

    server.shutdown();
    let _ = server_task.await;

    info!("livecast shutdown complete");
    Ok(())
}

/// Wait for SIGTERM signal (Unix only).
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    sigterm.recv().await;
}

/// Wait for SIGTERM signal (Windows - uses ctrl_c as fallback).
#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
