use crate::worker::WorkerCommand;
use common::mjpeg::{DemuxMode, DEFAULT_BOUNDARY, DEFAULT_MAX_FRAME_BYTES};
use common::serde_helpers::duration_ms;
use common::{CameraConfig, CameraRoster, Result, WallError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// 转码参数中的源地址占位符
pub const SOURCE_PLACEHOLDER: &str = "{source}";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerSettings,
    pub cameras: CameraRoster,
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub sessions: SessionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// 静态页面目录，不配置时不提供静态文件
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: None,
        }
    }
}

/// 转码进程命令模板
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSettings {
    pub program: String,
    pub args: Vec<String>,
    /// SIGTERM之后等待退出的时间，超时后强制终止
    #[serde(default = "default_kill_grace", with = "duration_ms")]
    pub kill_grace: Duration,
}

fn default_kill_grace() -> Duration {
    Duration::from_secs(3)
}

impl Default for WorkerSettings {
    fn default() -> Self {
        // 保守的转码参数：TCP拉流，640x480，8fps，单线程，输出到stdout
        let args = [
            "-rtsp_transport",
            "tcp",
            "-i",
            SOURCE_PLACEHOLDER,
            "-f",
            "mjpeg",
            "-vf",
            "scale=640:480",
            "-r",
            "8",
            "-q:v",
            "8",
            "-avoid_negative_ts",
            "make_zero",
            "-fflags",
            "+genpts",
            "-threads",
            "1",
            "-",
        ];

        Self {
            program: "ffmpeg".to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            kill_grace: default_kill_grace(),
        }
    }
}

impl WorkerSettings {
    /// 为摄像头生成转码命令
    pub fn command_for(&self, camera: &CameraConfig) -> WorkerCommand {
        WorkerCommand {
            program: self.program.clone(),
            args: self
                .args
                .iter()
                .map(|arg| arg.replace(SOURCE_PLACEHOLDER, &camera.source_url))
                .collect(),
            label: format!("camera {}", camera.id),
        }
    }
}

/// 会话生命周期参数，时长均以毫秒配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    #[serde(with = "duration_ms")]
    pub idle_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub sweep_interval: Duration,
    #[serde(with = "duration_ms")]
    pub stale_after: Duration,
    pub frame_log_interval: u64,
    pub demux_mode: DemuxMode,
    pub max_frame_bytes: usize,
    pub boundary: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(20 * 60),
            stale_after: Duration::from_secs(60 * 60),
            frame_log_interval: 80,
            demux_mode: DemuxMode::default(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            boundary: DEFAULT_BOUNDARY.to_string(),
        }
    }
}

impl Config {
    /// 从JSON文件加载并校验
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|e| {
            WallError::ConfigError(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.cameras.validate()?;

        if self.server.port == 0 {
            return Err(WallError::ConfigError("server.port must not be 0".to_string()));
        }
        if self.worker.program.trim().is_empty() {
            return Err(WallError::ConfigError(
                "worker.program must not be empty".to_string(),
            ));
        }

        let sessions = &self.sessions;
        for (name, value) in [
            ("idle_timeout", sessions.idle_timeout),
            ("sweep_interval", sessions.sweep_interval),
            ("stale_after", sessions.stale_after),
        ] {
            if value.is_zero() {
                return Err(WallError::ConfigError(format!(
                    "sessions.{} must be greater than 0",
                    name
                )));
            }
        }
        if sessions.max_frame_bytes == 0 {
            return Err(WallError::ConfigError(
                "sessions.max_frame_bytes must be greater than 0".to_string(),
            ));
        }
        if sessions.boundary.is_empty() || !sessions.boundary.is_ascii() {
            return Err(WallError::InvalidParameter(format!(
                "sessions.boundary: {:?}",
                sessions.boundary
            )));
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| {
                WallError::ConfigError(format!(
                    "Invalid listen address {}:{}: {}",
                    self.server.host, self.server.port, e
                ))
            })
    }
}
