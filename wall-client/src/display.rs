use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info, warn};

/// 摄像头画面上显示的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraStatus {
    Connecting,
    Connected,
    Retrying {
        delay: Duration,
        attempt: u32,
        max_attempts: u32,
    },
    Failed,
    Reconnecting,
}

impl fmt::Display for CameraStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraStatus::Connecting => write!(f, "Connecting..."),
            CameraStatus::Connected => write!(f, "Connected"),
            CameraStatus::Retrying {
                delay,
                attempt,
                max_attempts,
            } => {
                // 向上取整到秒
                let seconds = (delay.as_millis() + 999) / 1000;
                write!(
                    f,
                    "Connection lost. Retrying in {}s... ({}/{})",
                    seconds, attempt, max_attempts
                )
            }
            CameraStatus::Failed => write!(f, "Connection failed - check camera settings"),
            CameraStatus::Reconnecting => write!(f, "Reconnecting..."),
        }
    }
}

pub trait StatusDisplay: Send + Sync + 'static {
    fn show(&self, camera_id: u32, status: &CameraStatus);
}

/// 通过日志输出状态，并保留每个摄像头的最新状态
#[derive(Default)]
pub struct LogDisplay {
    latest: Mutex<BTreeMap<u32, CameraStatus>>,
}

impl LogDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self, camera_id: u32) -> Option<CameraStatus> {
        self.latest
            .lock()
            .ok()
            .and_then(|latest| latest.get(&camera_id).cloned())
    }
}

impl StatusDisplay for LogDisplay {
    fn show(&self, camera_id: u32, status: &CameraStatus) {
        match status {
            CameraStatus::Failed => error!("Camera {}: {}", camera_id, status),
            CameraStatus::Retrying { .. } => warn!("Camera {}: {}", camera_id, status),
            _ => info!("Camera {}: {}", camera_id, status),
        }

        if let Ok(mut latest) = self.latest.lock() {
            latest.insert(camera_id, status.clone());
        }
    }
}
