// 视频墙客户端 - 流连接
//
// 连接器只负责打开一次流请求并上报事件；重试、退避都由
// `CameraMonitor` 决定。每个连接带有代数，过期连接的事件会被忽略。

mod http;
#[cfg(test)]
pub mod testing;

pub use http::{fetch_roster, HttpConnector};

use tokio::sync::mpsc;

/// 单个流连接上报的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// 收到第一个完整帧
    FrameReady,
    /// 连接失败或中断
    Error(String),
    /// 本地主动断开
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub camera_id: u32,
    pub generation: u64,
    pub event: StreamEvent,
}

/// 绑定到某个摄像头某一代连接的事件发送端
#[derive(Debug, Clone)]
pub struct EventSender {
    camera_id: u32,
    generation: u64,
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl EventSender {
    pub fn new(camera_id: u32, generation: u64, tx: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        Self {
            camera_id,
            generation,
            tx,
        }
    }

    pub fn camera_id(&self) -> u32 {
        self.camera_id
    }

    /// 监视器已停止时返回 false
    pub fn send(&self, event: StreamEvent) -> bool {
        self.tx
            .send(ConnectionEvent {
                camera_id: self.camera_id,
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// 打开的流连接
pub trait StreamConnection: Send {
    /// 断开连接，之后上报 `Aborted`（如果还没有结束）
    fn disconnect(&mut self);
}

pub trait StreamConnector: Send + Sync + 'static {
    fn open(&self, camera_id: u32, url: &str, events: EventSender) -> Box<dyn StreamConnection>;
}
