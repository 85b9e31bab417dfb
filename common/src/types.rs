use crate::error::{Result, WallError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 摄像头配置
///
/// 启动时加载一次，之后只读。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub id: u32,
    pub name: String,
    /// 流媒体源地址（通常是RTSP）
    #[serde(rename = "rtsp_url", alias = "source_url")]
    pub source_url: String,
}

/// 对外公开的摄像头信息（不包含源地址）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraSummary {
    pub id: u32,
    pub name: String,
}

impl From<&CameraConfig> for CameraSummary {
    fn from(camera: &CameraConfig) -> Self {
        Self {
            id: camera.id,
            name: camera.name.clone(),
        }
    }
}

/// 摄像头花名册
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraRoster {
    cameras: Vec<CameraConfig>,
}

impl CameraRoster {
    pub fn new(cameras: Vec<CameraConfig>) -> Self {
        Self { cameras }
    }

    /// 按ID查找摄像头
    pub fn get(&self, camera_id: u32) -> Option<&CameraConfig> {
        self.cameras.iter().find(|c| c.id == camera_id)
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CameraConfig> {
        self.cameras.iter()
    }

    /// 公开列表，按配置顺序
    pub fn summaries(&self) -> Vec<CameraSummary> {
        self.cameras.iter().map(CameraSummary::from).collect()
    }

    /// 校验花名册：非空、ID唯一、名称和地址非空
    pub fn validate(&self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(WallError::ConfigError(
                "At least one camera must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for camera in &self.cameras {
            if !seen.insert(camera.id) {
                return Err(WallError::ConfigError(format!(
                    "Duplicate camera id: {}",
                    camera.id
                )));
            }
            if camera.name.trim().is_empty() {
                return Err(WallError::ConfigError(format!(
                    "Camera {} has an empty name",
                    camera.id
                )));
            }
            if camera.source_url.trim().is_empty() {
                return Err(WallError::ConfigError(format!(
                    "Camera {} has an empty source url",
                    camera.id
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(id: u32, name: &str, url: &str) -> CameraConfig {
        CameraConfig {
            id,
            name: name.to_string(),
            source_url: url.to_string(),
        }
    }

    #[test]
    fn test_camera_config_accepts_both_url_keys() {
        let a: CameraConfig =
            serde_json::from_str(r#"{"id":1,"name":"Lobby","rtsp_url":"rtsp://cam1"}"#).unwrap();
        let b: CameraConfig =
            serde_json::from_str(r#"{"id":1,"name":"Lobby","source_url":"rtsp://cam1"}"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.source_url, "rtsp://cam1");
    }

    #[test]
    fn test_summary_hides_source_url() {
        let roster = CameraRoster::new(vec![camera(1, "Lobby", "rtsp://secret")]);
        let json = serde_json::to_string(&roster.summaries()).unwrap();
        assert_eq!(json, r#"[{"id":1,"name":"Lobby"}]"#);
    }

    #[test]
    fn test_roster_validation() {
        assert!(CameraRoster::default().validate().is_err());

        let duplicate = CameraRoster::new(vec![
            camera(1, "Lobby", "rtsp://cam1"),
            camera(1, "Dock", "rtsp://cam2"),
        ]);
        assert!(duplicate.validate().is_err());

        let empty_url = CameraRoster::new(vec![camera(3, "Yard", " ")]);
        assert!(empty_url.validate().is_err());

        let ok = CameraRoster::new(vec![
            camera(1, "Lobby", "rtsp://cam1"),
            camera(2, "Dock", "rtsp://cam2"),
        ]);
        assert!(ok.validate().is_ok());
        assert_eq!(ok.get(2).map(|c| c.name.as_str()), Some("Dock"));
        assert!(ok.get(9).is_none());
    }
}
