mod config;
mod http;
mod session;
mod streaming;
mod worker;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

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

    let matches = Command::new("MJPEG Relay Server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Relays camera streams to browsers as MJPEG")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to the JSON configuration file")
                .value_parser(value_parser!(PathBuf))
                .default_value("config.json"),
        )
        .get_matches();

    let config_path = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("config.json"));

    info!("🚀 Relay server starting...");

    // 加载配置
    let config = config::Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let addr = config.bind_addr()?;
    info!("✓ Configuration loaded from {}", config_path.display());
    info!("  Configured cameras: {}", config.cameras.len());
    info!(
        "  Worker: {} ({} args), demux mode {:?}",
        config.worker.program,
        config.worker.args.len(),
        config.sessions.demux_mode
    );

    let registry = session::SessionRegistry::from_config(
        &config,
        Arc::new(worker::ProcessLauncher::new(config.worker.kill_grace)),
    );

    // 周期清理过旧的会话
    let stop_sweeper = CancellationToken::new();
    let sweeper = tokio::spawn(registry.clone().run_sweeper(stop_sweeper.clone()));
    info!(
        "✓ Sweeper started (every {:?}, stale after {:?})",
        config.sessions.sweep_interval, config.sessions.stale_after
    );

    // 先关闭所有会话，MJPEG响应体才会结束，优雅关闭才能完成
    let shutdown = {
        let registry = registry.clone();
        let stop_sweeper = stop_sweeper.clone();
        async move {
            shutdown_signal().await;
            info!("Shutting down server...");
            stop_sweeper.cancel();
            registry.shutdown();
        }
    };

    let server = http::HttpServer::new(addr, registry.clone(), config.server.static_dir.clone());
    info!("✅ Relay server ready!");

    let result = server.run(shutdown).await;

    // 监听失败时也要清理已启动的进程
    stop_sweeper.cancel();
    registry.shutdown();
    if let Err(e) = sweeper.await {
        warn!("Sweeper task ended abnormally: {}", e);
    }

    result?;
    info!("Server closed");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
