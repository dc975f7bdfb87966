//! kv-http-gateway: serves values from an embedded key-value store over HTTP.
//!
//! Features:
//! - One listener thread and a fixed pool of worker threads
//! - `GET /<key>` returns the raw bytes stored under `<key>`
//! - Optional preload of a directory into the store at startup
//! - Configuration via CLI arguments or TOML file

use kv_http_gateway::{start_expiry_sweeper, Gateway, MemoryStore, ServerConfig};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = ServerConfig::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        workers = config.workers,
        queue_capacity = ?config.queue_capacity,
        failure_policy = ?config.failure_policy,
        "Starting kv-http-gateway"
    );

    let store = Arc::new(MemoryStore::new());
    if let Some(dir) = &config.preload_dir {
        if let Err(e) = store.preload_dir(dir) {
            error!(dir = %dir.display(), error = %e, "Failed to preload store");
            return Err(e.into());
        }
    }

    // Spawn background cleanup task for expired keys
    start_expiry_sweeper(&store, config.cleanup_interval)?;

    let gateway = match Gateway::start(config, store) {
        Ok(gateway) => gateway,
        Err(e) => {
            error!(error = %e, "Failed to start gateway");
            return Err(e.into());
        }
    };
    gateway.join();
    Ok(())
}
