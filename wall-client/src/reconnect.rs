// 视频墙客户端 - 重连状态机
//
// 每个摄像头：Idle → Connecting → Connected / RetryPending → ... → Failed。
// 所有状态转换都在同一把锁内同步完成；每个摄像头最多一个有效定时器，
// 重新设置或取消定时器都会推进 epoch，已触发但尚未执行的回调因此失效。

use crate::config::{ClientConfig, ReconnectPolicy};
use crate::connector::{ConnectionEvent, EventSender, StreamConnection, StreamConnector, StreamEvent};
use crate::display::{CameraStatus, StatusDisplay};
use chrono::Utc;
use common::timer::{TimerHandle, TimerService};
use common::{stream_path, CameraSummary};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    RetryPending,
    Failed,
}

/// 单个摄像头的状态快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraSnapshot {
    pub camera_id: u32,
    pub name: String,
    pub state: ConnectionState,
    pub attempt_count: u32,
    pub is_reconnecting: bool,
}

#[derive(Debug, Clone, Copy)]
enum TimerAction {
    /// 错开延迟结束，发出流请求
    Open,
    /// 自动重试
    Retry,
    /// 手动重连的固定延迟结束
    Connect,
    /// 全部重连中轮到本摄像头
    ManualReconnect,
}

struct ReconnectState {
    camera_id: u32,
    position: usize,
    state: ConnectionState,
    attempt_count: u32,
    is_reconnecting: bool,
    timer: Option<TimerHandle>,
    epoch: u64,
    connection: Option<Box<dyn StreamConnection>>,
    generation: u64,
}

impl ReconnectState {
    fn new(camera_id: u32, position: usize) -> Self {
        Self {
            camera_id,
            position,
            state: ConnectionState::Idle,
            attempt_count: 0,
            is_reconnecting: false,
            timer: None,
            epoch: 0,
            connection: None,
            generation: 0,
        }
    }

    fn cancel_timer(&mut self) {
        self.epoch += 1;
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }

    /// 断开当前连接；旧连接之后的事件都会被忽略
    fn clear_source(&mut self) {
        self.generation += 1;
        if let Some(mut connection) = self.connection.take() {
            connection.disconnect();
        }
    }
}

struct MonitorInner {
    server: String,
    policy: ReconnectPolicy,
    stagger: Duration,
    manual_delay: Duration,
    reconnect_all_stagger: Duration,
    roster: Vec<CameraSummary>,
    connector: Arc<dyn StreamConnector>,
    display: Arc<dyn StatusDisplay>,
    timers: TimerService,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    cameras: Mutex<BTreeMap<u32, ReconnectState>>,
}

/// 所有摄像头的重连状态
#[derive(Clone)]
pub struct CameraMonitor {
    inner: Arc<MonitorInner>,
}

impl CameraMonitor {
    /// 创建监视器并启动事件循环，必须在tokio运行时中调用
    pub fn start(
        roster: Vec<CameraSummary>,
        config: &ClientConfig,
        connector: Arc<dyn StreamConnector>,
        display: Arc<dyn StatusDisplay>,
    ) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        let cameras = roster
            .iter()
            .enumerate()
            .map(|(position, camera)| (camera.id, ReconnectState::new(camera.id, position)))
            .collect();

        let inner = Arc::new(MonitorInner {
            server: config.server.clone(),
            policy: config.policy,
            stagger: config.stagger,
            manual_delay: config.manual_delay,
            reconnect_all_stagger: config.reconnect_all_stagger,
            roster,
            connector,
            display,
            timers: TimerService::new(),
            events,
            cameras: Mutex::new(cameras),
        });

        tokio::spawn(event_loop(Arc::downgrade(&inner), rx));
        Self { inner }
    }

    pub fn roster(&self) -> &[CameraSummary] {
        &self.inner.roster
    }

    fn cameras(&self) -> MutexGuard<'_, BTreeMap<u32, ReconnectState>> {
        match self.inner.cameras.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 连接所有摄像头
    pub fn connect_all(&self) {
        for camera in &self.inner.roster {
            self.connect(camera.id);
        }
    }

    /// 开始一次连接；已经在连接中时返回 false
    pub fn connect(&self, camera_id: u32) -> bool {
        let mut cameras = self.cameras();
        match cameras.get_mut(&camera_id) {
            Some(camera) => self.connect_locked(camera),
            None => {
                warn!("Unknown camera {}", camera_id);
                false
            }
        }
    }

    fn connect_locked(&self, camera: &mut ReconnectState) -> bool {
        if camera.is_reconnecting {
            debug!("Camera {} already reconnecting, skipping...", camera.camera_id);
            return false;
        }

        camera.is_reconnecting = true;
        camera.state = ConnectionState::Connecting;
        camera.clear_source();
        self.inner
            .display
            .show(camera.camera_id, &CameraStatus::Connecting);

        let delay = self.inner.stagger * (camera.position as u32 + 1);
        self.schedule(camera, delay, TimerAction::Open);
        true
    }

    fn open_stream(&self, camera: &mut ReconnectState) {
        let url = format!(
            "{}{}?t={}&r={}",
            self.inner.server,
            stream_path(camera.camera_id),
            Utc::now().timestamp_millis(),
            Uuid::new_v4().simple()
        );
        info!("Connecting to camera {} stream: {}", camera.camera_id, url);

        let events = EventSender::new(
            camera.camera_id,
            camera.generation,
            self.inner.events.clone(),
        );
        camera.connection = Some(self.inner.connector.open(camera.camera_id, &url, events));
    }

    /// 处理连接事件，过期连接的事件被忽略
    pub fn handle_event(&self, event: ConnectionEvent) {
        let mut cameras = self.cameras();
        let Some(camera) = cameras.get_mut(&event.camera_id) else {
            return;
        };
        if event.generation != camera.generation {
            debug!(
                "Ignoring {:?} from stale connection of camera {}",
                event.event, event.camera_id
            );
            return;
        }

        match event.event {
            StreamEvent::FrameReady => {
                info!("Camera {} stream connected", camera.camera_id);
                camera.state = ConnectionState::Connected;
                camera.attempt_count = 0;
                camera.is_reconnecting = false;
                self.inner
                    .display
                    .show(camera.camera_id, &CameraStatus::Connected);
            }
            StreamEvent::Error(cause) => {
                warn!("Camera {} stream error: {}", camera.camera_id, cause);
                camera.is_reconnecting = false;
                camera.connection = None;
                self.handle_connection_error(camera);
            }
            StreamEvent::Aborted => {
                info!("Camera {} stream aborted", camera.camera_id);
                camera.is_reconnecting = false;
                camera.connection = None;
                camera.state = ConnectionState::Idle;
            }
        }
    }

    fn handle_connection_error(&self, camera: &mut ReconnectState) {
        camera.cancel_timer();

        let policy = self.inner.policy;
        if camera.attempt_count < policy.max_attempts {
            let delay = policy.delay_for(camera.attempt_count);
            camera.attempt_count += 1;
            camera.state = ConnectionState::RetryPending;
            self.inner.display.show(
                camera.camera_id,
                &CameraStatus::Retrying {
                    delay,
                    attempt: camera.attempt_count,
                    max_attempts: policy.max_attempts,
                },
            );
            self.schedule(camera, delay, TimerAction::Retry);
        } else {
            camera.clear_source();
            camera.is_reconnecting = false;
            camera.state = ConnectionState::Failed;
            self.inner
                .display
                .show(camera.camera_id, &CameraStatus::Failed);
        }
    }

    /// 手动重连：任何状态下都可用，包括 Failed
    pub fn manual_reconnect(&self, camera_id: u32) -> bool {
        let mut cameras = self.cameras();
        match cameras.get_mut(&camera_id) {
            Some(camera) => {
                self.manual_reconnect_locked(camera);
                true
            }
            None => {
                warn!("Unknown camera {}", camera_id);
                false
            }
        }
    }

    fn manual_reconnect_locked(&self, camera: &mut ReconnectState) {
        info!("Manual reconnect for camera {}", camera.camera_id);

        camera.cancel_timer();
        camera.attempt_count = 0;
        camera.is_reconnecting = false;
        camera.clear_source();
        camera.state = ConnectionState::Idle;

        self.schedule(camera, self.inner.manual_delay, TimerAction::Connect);
    }

    /// 依次手动重连所有摄像头，相邻摄像头间隔 `reconnect_all_stagger`
    pub fn reconnect_all(&self) {
        info!("Reconnecting all cameras with staggered timing...");

        let mut cameras = self.cameras();
        for camera in cameras.values_mut() {
            self.inner
                .display
                .show(camera.camera_id, &CameraStatus::Reconnecting);
            let delay = self.inner.reconnect_all_stagger * camera.position as u32;
            self.schedule(camera, delay, TimerAction::ManualReconnect);
        }
    }

    /// 取消所有定时器并断开所有连接
    pub fn stop(&self) {
        let mut cameras = self.cameras();
        for camera in cameras.values_mut() {
            camera.cancel_timer();
            camera.clear_source();
            camera.is_reconnecting = false;
            camera.state = ConnectionState::Idle;
        }
        debug!("Camera monitor stopped");
    }

    /// 按花名册顺序
    pub fn snapshot(&self) -> Vec<CameraSnapshot> {
        let cameras = self.cameras();
        self.inner
            .roster
            .iter()
            .filter_map(|summary| {
                cameras.get(&summary.id).map(|camera| CameraSnapshot {
                    camera_id: camera.camera_id,
                    name: summary.name.clone(),
                    state: camera.state,
                    attempt_count: camera.attempt_count,
                    is_reconnecting: camera.is_reconnecting,
                })
            })
            .collect()
    }

    fn schedule(&self, camera: &mut ReconnectState, delay: Duration, action: TimerAction) {
        camera.cancel_timer();

        let epoch = camera.epoch;
        let camera_id = camera.camera_id;
        let monitor = self.clone();
        camera.timer = Some(self.inner.timers.schedule(delay, async move {
            monitor.on_timer(camera_id, epoch, action);
        }));
    }

    fn on_timer(&self, camera_id: u32, epoch: u64, action: TimerAction) {
        let mut cameras = self.cameras();
        let Some(camera) = cameras.get_mut(&camera_id) else {
            return;
        };
        if camera.epoch != epoch {
            debug!("Ignoring stale {:?} timer for camera {}", action, camera_id);
            return;
        }
        // 已触发，丢弃句柄即可
        camera.timer = None;

        match action {
            TimerAction::Open => self.open_stream(camera),
            TimerAction::Retry => {
                info!(
                    "Auto-reconnecting camera {}, attempt {}",
                    camera_id, camera.attempt_count
                );
                self.connect_locked(camera);
            }
            TimerAction::Connect => {
                self.connect_locked(camera);
            }
            TimerAction::ManualReconnect => self.manual_reconnect_locked(camera),
        }
    }
}

async fn event_loop(monitor: Weak<MonitorInner>, mut rx: mpsc::UnboundedReceiver<ConnectionEvent>) {
    while let Some(event) = rx.recv().await {
        match monitor.upgrade() {
            Some(inner) => CameraMonitor { inner }.handle_event(event),
            None => break,
        }
    }
    debug!("Camera monitor event loop stopped");
}
