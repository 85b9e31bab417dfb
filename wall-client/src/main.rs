mod config;
mod connector;
mod console;
mod display;
mod error;
mod reconnect;

use anyhow::{Context, Result};
use config::ClientConfig;
use connector::{fetch_roster, HttpConnector};
use display::LogDisplay;
use reconnect::CameraMonitor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志 - 使用环境变量 RUST_LOG 控制级别
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let matches = ClientConfig::command().get_matches();
    let config = ClientConfig::from_matches(&matches)?;
    info!("Video wall client starting, server: {}", config.server);

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()
        .context("Failed to build HTTP client")?;

    let roster = fetch_roster(&client, &config.server)
        .await
        .with_context(|| format!("Failed to load camera list from {}", config.server))?;
    if roster.is_empty() {
        warn!("Server reported no cameras");
        return Ok(());
    }
    info!("Loaded {} camera(s)", roster.len());

    let connector = Arc::new(HttpConnector::new(client, config.stall_timeout));
    let display = Arc::new(LogDisplay::new());
    let monitor = CameraMonitor::start(roster, &config, connector, display.clone());
    for camera in monitor.roster() {
        info!("  Camera {}: {}", camera.id, camera.name);
    }
    monitor.connect_all();

    tokio::select! {
        result = console::run(monitor.clone(), display) => {
            if let Err(e) = result {
                error!("Console error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C");
        }
    }

    monitor.stop();
    info!("Video wall client stopped");
    Ok(())
}
