//! uptrail - synthetic HTTP monitoring.
//!
//! Probes declared services on their own intervals, stores every outcome and
//! serves bucketed health over a small JSON API.

mod config;
mod db;
mod monitor;
mod probe;
mod scheduler;
#[cfg(test)]
mod testutil;
mod web;

use config::ServerConfig;
use db::Store;
use monitor::MonitorConfig;
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("uptrail=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Loading monitors from {}", cfg.config_path);
    let monitors = Arc::new(MonitorConfig::load_file(&cfg.config_path)?);
    tracing::info!("Loaded {} monitors", monitors.monitors.len());

    // Initialize database
    tracing::info!("Using database at {}", cfg.db_path);
    let store = Arc::new(Store::new(&cfg.db_path)?);

    // Start scheduler
    let scheduler = Scheduler::new(monitors.clone(), store.clone());
    scheduler.start().await?;

    // Serve until interrupted
    let server = Server::new(cfg.clone(), monitors, store);
    let served = server
        .start(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await;

    scheduler.shutdown(cfg.shutdown_timeout).await?;
    served
}
