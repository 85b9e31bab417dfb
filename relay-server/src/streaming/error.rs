// 视频墙 - 流错误类型定义
//
// 请求阶段的错误（`StreamError`）直接映射为HTTP状态码；
// 会话结束的原因（`CloseReason`）统一经过 `SessionRegistry::close_session`。
// 服务端从不重试，重试策略全部在客户端。

use crate::worker::{WorkerError, WorkerExit};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;
use thiserror::Error;

/// 流请求错误
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// 摄像头未配置
    #[error("Camera not found")]
    CameraNotFound(u32),

    /// 转码进程无法启动
    #[error("Failed to start worker: {0}")]
    Spawn(String),

    /// 正在关闭，不再接受新会话
    #[error("Server shutting down")]
    ShuttingDown,
}

impl StreamError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            StreamError::CameraNotFound(_) => StatusCode::NOT_FOUND,
            StreamError::Spawn(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StreamError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<WorkerError> for StreamError {
    fn from(error: WorkerError) -> Self {
        StreamError::Spawn(error.to_string())
    }
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

/// 会话结束原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// 客户端断开连接
    ClientDisconnect,
    /// 写入响应失败
    SinkWrite,
    /// 转码进程退出
    WorkerExited(Option<i32>),
    /// 转码进程出错
    WorkerError(String),
    /// 空闲超时
    IdleTimeout,
    /// 周期清理：会话过旧
    Stale,
    /// 同一摄像头的新请求取代了本会话
    Superseded,
    /// 显式清理请求
    CleanupRequested,
    /// 进程关闭
    Shutdown,
}

impl From<WorkerExit> for CloseReason {
    fn from(exit: WorkerExit) -> Self {
        match exit {
            WorkerExit::Exited(code) => CloseReason::WorkerExited(code),
            WorkerExit::Failed(cause) => CloseReason::WorkerError(cause),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientDisconnect => write!(f, "client disconnected"),
            CloseReason::SinkWrite => write!(f, "response no longer writable"),
            CloseReason::WorkerExited(Some(code)) => write!(f, "worker exited with code {}", code),
            CloseReason::WorkerExited(None) => write!(f, "worker terminated"),
            CloseReason::WorkerError(cause) => write!(f, "worker error: {}", cause),
            CloseReason::IdleTimeout => write!(f, "idle timeout"),
            CloseReason::Stale => write!(f, "stale session"),
            CloseReason::Superseded => write!(f, "superseded by a newer request"),
            CloseReason::CleanupRequested => write!(f, "cleanup requested"),
            CloseReason::Shutdown => write!(f, "server shutdown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            StreamError::CameraNotFound(7).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            StreamError::Spawn("boom".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            StreamError::ShuttingDown.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_not_found_message() {
        assert_eq!(StreamError::CameraNotFound(7).to_string(), "Camera not found");
    }

    #[test]
    fn test_worker_error_conversion() {
        let error = WorkerError::Spawn {
            program: "ffmpeg".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "not found"),
        };
        match StreamError::from(error) {
            StreamError::Spawn(message) => assert!(message.contains("ffmpeg")),
            other => panic!("Expected Spawn error, got {:?}", other),
        }
    }

    #[test]
    fn test_close_reason_from_exit() {
        assert_eq!(
            CloseReason::from(WorkerExit::Exited(Some(1))),
            CloseReason::WorkerExited(Some(1))
        );
        assert!(matches!(
            CloseReason::from(WorkerExit::Failed("x".to_string())),
            CloseReason::WorkerError(_)
        ));
    }
}
