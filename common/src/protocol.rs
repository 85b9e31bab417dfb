use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 单个摄像头的流状态（健康检查用）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraStreamStats {
    /// 活跃会话数（注册表保证最多为1）
    pub count: usize,
    /// 会话已运行秒数
    pub uptime_seconds: u64,
    pub session_id: String,
    /// RFC 3339
    pub started_at: String,
    pub frames: u64,
}

/// `GET /api/health` 响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub active_streams: usize,
    pub streams_by_camera: BTreeMap<u32, CameraStreamStats>,
    /// 进程运行秒数
    pub uptime: u64,
    pub configured_cameras: usize,
}

/// `POST /api/camera/{id}/cleanup` 响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub message: String,
}

impl CleanupResponse {
    pub fn for_camera(camera_id: u32) -> Self {
        Self {
            message: format!("Cleaned up streams for camera {}", camera_id),
        }
    }
}

/// 摄像头MJPEG流路径
pub fn stream_path(camera_id: u32) -> String {
    format!("/camera/{}/stream", camera_id)
}

/// 摄像头列表路径
pub const CAMERAS_PATH: &str = "/api/cameras";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_field_names() {
        let mut streams = BTreeMap::new();
        streams.insert(
            1,
            CameraStreamStats {
                count: 1,
                uptime_seconds: 42,
                session_id: "4b1c0c1e-7a52-4a8e-9d0e-1f7f2d3c9a10".to_string(),
                started_at: "2026-10-16T08:00:00+00:00".to_string(),
                frames: 336,
            },
        );
        let health = HealthResponse {
            status: "ok".to_string(),
            active_streams: 1,
            streams_by_camera: streams,
            uptime: 100,
            configured_cameras: 4,
        };

        let value = serde_json::to_value(&health).unwrap();
        assert_eq!(value["activeStreams"], 1);
        assert_eq!(value["configuredCameras"], 4);
        assert_eq!(value["streamsByCamera"]["1"]["count"], 1);
        assert_eq!(value["streamsByCamera"]["1"]["uptimeSeconds"], 42);
        assert_eq!(value["streamsByCamera"]["1"]["frames"], 336);
        assert_eq!(
            value["streamsByCamera"]["1"]["startedAt"],
            "2026-10-16T08:00:00+00:00"
        );
        assert!(value["streamsByCamera"]["1"]["sessionId"].is_string());
    }

    #[test]
    fn test_paths() {
        assert_eq!(stream_path(3), "/camera/3/stream");
        assert_eq!(
            CleanupResponse::for_camera(3).message,
            "Cleaned up streams for camera 3"
        );
    }
}
