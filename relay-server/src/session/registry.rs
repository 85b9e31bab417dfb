// 视频墙 - 流会话注册表
//
// 每个摄像头最多一个活跃会话。同一摄像头的打开请求由该摄像头的
// 异步锁排队，替换旧会话与注册新会话都在锁内完成；启动进程时不持有
// 会话表的分片锁。所有关闭路径都经过 `close_session`。

use crate::config::{Config, SessionSettings, WorkerSettings};
use crate::streaming::{
    sink_channel, watch_diagnostics, CloseReason, FrameRelay, FrameSink, StreamError,
};
use crate::worker::{
    ByteStream, WorkerError, WorkerExitWatch, WorkerHandle, WorkerKiller, WorkerLauncher,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::mjpeg::{JpegDemuxer, MultipartEncoder};
use common::timer::{TimerHandle, TimerService};
use common::{CameraConfig, CameraRoster};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 会话标识：摄像头 + 会话ID
///
/// 关闭时两者都必须匹配，已被取代的会话的迟到事件因此是空操作。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionTicket {
    pub camera_id: u32,
    pub session_id: Uuid,
}

/// 新会话的响应部分
#[derive(Debug)]
pub struct SessionStream {
    pub ticket: SessionTicket,
    pub content_type: String,
    /// 已封装好的multipart分段
    pub body: mpsc::Receiver<Bytes>,
}

/// 会话快照（健康检查用）
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub frames: u64,
}

struct ActiveSession {
    ticket: SessionTicket,
    started_at: Instant,
    started_wall: DateTime<Utc>,
    frames: Arc<AtomicU64>,
    killer: WorkerKiller,
    cancel: CancellationToken,
    idle_timer: Option<TimerHandle>,
}

impl ActiveSession {
    /// 取消定时器、终止进程、结束转发，顺序无关且都幂等
    fn teardown(&mut self, reason: &CloseReason) {
        if let Some(timer) = self.idle_timer.take() {
            timer.cancel();
        }
        self.killer.kill();
        self.cancel.cancel();

        info!(
            "Closed stream for camera {} ({}): {} frames in {}s",
            self.ticket.camera_id,
            reason,
            self.frames.load(Ordering::Relaxed),
            self.started_at.elapsed().as_secs()
        );
    }
}

struct RegistryInner {
    roster: CameraRoster,
    launcher: Arc<dyn WorkerLauncher>,
    worker: WorkerSettings,
    settings: SessionSettings,
    encoder: MultipartEncoder,
    timers: TimerService,
    sessions: DashMap<u32, ActiveSession>,
    /// 每个摄像头一个，串行化该摄像头的打开请求
    open_gates: HashMap<u32, Arc<Mutex<()>>>,
    closing: AtomicBool,
}

/// 已启动进程、尚未开始转发的部分
///
/// 会话注册之后才启动转发任务，转发任务的关闭请求因此总能找到会话。
struct PendingRelay {
    relay: FrameRelay,
    stdout: ByteStream,
    stderr: ByteStream,
    sink: FrameSink,
    exit: WorkerExitWatch,
}

impl PendingRelay {
    fn launch(self, registry: SessionRegistry, ticket: SessionTicket) {
        let PendingRelay {
            relay,
            stdout,
            stderr,
            sink,
            exit,
        } = self;

        tokio::spawn(watch_diagnostics(relay.camera_id, stderr));
        tokio::spawn(async move {
            if let Some(reason) = relay.run(stdout, sink, exit).await {
                registry.close_session(ticket, reason);
            }
        });
    }
}

#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(
        roster: CameraRoster,
        launcher: Arc<dyn WorkerLauncher>,
        worker: WorkerSettings,
        settings: SessionSettings,
    ) -> Self {
        let encoder = MultipartEncoder::new(settings.boundary.clone());
        let open_gates = roster
            .iter()
            .map(|camera| (camera.id, Arc::new(Mutex::new(()))))
            .collect();
        Self {
            inner: Arc::new(RegistryInner {
                roster,
                launcher,
                worker,
                settings,
                encoder,
                timers: TimerService::new(),
                sessions: DashMap::new(),
                open_gates,
                closing: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_config(config: &Config, launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self::new(
            config.cameras.clone(),
            launcher,
            config.worker.clone(),
            config.sessions.clone(),
        )
    }

    pub fn roster(&self) -> &CameraRoster {
        &self.inner.roster
    }

    /// 为摄像头打开新会话，先同步关闭该摄像头已有的会话
    ///
    /// 未知摄像头不会修改注册表；进程启动失败时不注册会话。
    pub async fn open_session(&self, camera_id: u32) -> Result<SessionStream, StreamError> {
        self.ensure_accepting()?;

        let camera = self
            .inner
            .roster
            .get(camera_id)
            .ok_or(StreamError::CameraNotFound(camera_id))?;
        let gate = self
            .inner
            .open_gates
            .get(&camera_id)
            .ok_or(StreamError::CameraNotFound(camera_id))?;

        let _turn = gate.lock().await;
        self.ensure_accepting()?;

        if let Some((_, mut previous)) = self.inner.sessions.remove(&camera_id) {
            info!(
                "Superseding stream {} for camera {}",
                previous.ticket.session_id, camera_id
            );
            previous.teardown(&CloseReason::Superseded);
        }

        let ticket = SessionTicket {
            camera_id,
            session_id: Uuid::new_v4(),
        };
        let (session, stream, pending) = self.start(ticket, camera)?;
        self.inner.sessions.insert(camera_id, session);

        // 启动进程期间可能已经开始关闭
        if self.inner.closing.load(Ordering::SeqCst) {
            self.close_session(ticket, CloseReason::Shutdown);
            return Err(StreamError::ShuttingDown);
        }

        pending.launch(self.clone(), ticket);
        Ok(stream)
    }

    fn ensure_accepting(&self) -> Result<(), StreamError> {
        if self.inner.closing.load(Ordering::SeqCst) {
            Err(StreamError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    /// 启动进程并准备转发、空闲定时器
    fn start(
        &self,
        ticket: SessionTicket,
        camera: &CameraConfig,
    ) -> Result<(ActiveSession, SessionStream, PendingRelay), StreamError> {
        let command = self.inner.worker.command_for(camera);
        info!("Starting stream for camera {} ({})", camera.id, camera.name);

        let mut handle: WorkerHandle = self.inner.launcher.spawn(&command).map_err(|e| {
            warn!("Failed to start worker for camera {}: {}", camera.id, e);
            StreamError::from(e)
        })?;

        debug!("Worker for camera {} has pid {:?}", camera.id, handle.pid());

        let (stdout, stderr) = match (handle.take_stdout(), handle.take_stderr()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            (stdout, _) => {
                handle.kill();
                let pipe = if stdout.is_none() { "stdout" } else { "stderr" };
                return Err(WorkerError::MissingPipe(pipe).into());
            }
        };

        let settings = &self.inner.settings;
        let frames = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();
        let (sink, body) = sink_channel();

        let pending = PendingRelay {
            relay: FrameRelay {
                camera_id: camera.id,
                demuxer: JpegDemuxer::with_limit(settings.demux_mode, settings.max_frame_bytes),
                encoder: self.inner.encoder.clone(),
                frames: frames.clone(),
                cancel: cancel.clone(),
                log_interval: settings.frame_log_interval,
            },
            stdout,
            stderr,
            sink,
            exit: handle.exit_watch(),
        };

        let registry = self.clone();
        let idle_timer = self.inner.timers.schedule(settings.idle_timeout, async move {
            registry.close_session(ticket, CloseReason::IdleTimeout);
        });

        let session = ActiveSession {
            ticket,
            started_at: Instant::now(),
            started_wall: Utc::now(),
            frames,
            killer: handle.killer(),
            cancel,
            idle_timer: Some(idle_timer),
        };

        let stream = SessionStream {
            ticket,
            content_type: self.inner.encoder.content_type(),
            body,
        };

        Ok((session, stream, pending))
    }

    /// 关闭指定会话；会话已不存在或已被取代时返回 false
    pub fn close_session(&self, ticket: SessionTicket, reason: CloseReason) -> bool {
        let removed = self
            .inner
            .sessions
            .remove_if(&ticket.camera_id, |_, session| {
                session.ticket.session_id == ticket.session_id
            });

        match removed {
            Some((_, mut session)) => {
                session.teardown(&reason);
                true
            }
            None => {
                debug!(
                    "Session {} for camera {} already closed ({})",
                    ticket.session_id, ticket.camera_id, reason
                );
                false
            }
        }
    }

    /// 关闭摄像头当前的会话（如果有）
    pub fn close_camera(&self, camera_id: u32, reason: CloseReason) -> bool {
        match self.inner.sessions.remove(&camera_id) {
            Some((_, mut session)) => {
                session.teardown(&reason);
                true
            }
            None => false,
        }
    }

    /// 关闭所有早于 `stale_after` 的会话，返回关闭数量
    pub fn sweep_at(&self, now: Instant) -> usize {
        let stale_after = self.inner.settings.stale_after;
        let stale: Vec<SessionTicket> = self
            .inner
            .sessions
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.started_at) > stale_after)
            .map(|entry| entry.ticket)
            .collect();

        let closed = stale
            .into_iter()
            .filter(|ticket| self.close_session(*ticket, CloseReason::Stale))
            .count();

        if closed > 0 {
            info!("Sweep closed {} stale stream(s)", closed);
        } else {
            debug!("Sweep found no stale streams");
        }
        closed
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// 周期清理，直到 `shutdown` 被触发
    pub async fn run_sweeper(self, shutdown: CancellationToken) {
        let period = self.inner.settings.sweep_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.sweep();
                }
            }
        }
        debug!("Sweeper stopped");
    }

    /// 关闭所有会话并拒绝之后的请求，返回关闭数量
    pub fn shutdown(&self) -> usize {
        self.inner.closing.store(true, Ordering::SeqCst);

        let cameras: Vec<u32> = self.inner.sessions.iter().map(|e| *e.key()).collect();
        let closed = cameras
            .into_iter()
            .filter(|camera_id| self.close_camera(*camera_id, CloseReason::Shutdown))
            .count();

        info!("Session registry shut down, {} stream(s) closed", closed);
        closed
    }

    pub fn active_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// 摄像头当前会话
    pub fn ticket(&self, camera_id: u32) -> Option<SessionTicket> {
        self.inner.sessions.get(&camera_id).map(|s| s.ticket)
    }

    pub fn snapshot(&self) -> BTreeMap<u32, SessionInfo> {
        self.inner
            .sessions
            .iter()
            .map(|entry| {
                let session = entry.value();
                (
                    *entry.key(),
                    SessionInfo {
                        session_id: session.ticket.session_id,
                        started_at: session.started_wall,
                        uptime_seconds: session.started_at.elapsed().as_secs(),
                        frames: session.frames.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }
}
