// 测试用连接器：事件由测试代码触发

use super::{EventSender, StreamConnection, StreamConnector, StreamEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// 一次被打开的连接
#[derive(Clone)]
pub struct FakeStream {
    pub camera_id: u32,
    pub url: String,
    events: EventSender,
    disconnected: Arc<AtomicBool>,
}

impl FakeStream {
    pub fn frame(&self) {
        self.events.send(StreamEvent::FrameReady);
    }

    pub fn fail(&self, cause: &str) {
        self.events.send(StreamEvent::Error(cause.to_string()));
    }

    pub fn abort(&self) {
        self.events.send(StreamEvent::Aborted);
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

struct FakeConnection {
    stream: FakeStream,
}

impl StreamConnection for FakeConnection {
    fn disconnect(&mut self) {
        if !self.stream.disconnected.swap(true, Ordering::SeqCst) {
            self.stream.abort();
        }
    }
}

#[derive(Default)]
pub struct FakeConnector {
    opened: Mutex<Vec<FakeStream>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 所有打开过的连接
    pub fn opened(&self) -> Vec<FakeStream> {
        self.opened.lock().unwrap().clone()
    }

    /// 某个摄像头打开过的连接数
    pub fn opened_for(&self, camera_id: u32) -> usize {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.camera_id == camera_id)
            .count()
    }

    /// 某个摄像头最近一次打开的连接
    pub fn latest(&self, camera_id: u32) -> FakeStream {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| s.camera_id == camera_id)
            .cloned()
            .expect("no stream opened for camera")
    }
}

impl StreamConnector for FakeConnector {
    fn open(&self, camera_id: u32, url: &str, events: EventSender) -> Box<dyn StreamConnection> {
        let stream = FakeStream {
            camera_id,
            url: url.to_string(),
            events,
            disconnected: Arc::new(AtomicBool::new(false)),
        };
        self.opened.lock().unwrap().push(stream.clone());
        Box::new(FakeConnection { stream })
    }
}
