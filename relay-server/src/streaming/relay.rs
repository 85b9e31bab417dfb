// 视频墙 - 帧转发
//
// 单生产者（转码进程输出）到单消费者（HTTP响应）的转发循环。
// 响应通道容量为1，最多缓存一帧；发送失败视为会话终止，不重试。

use super::error::CloseReason;
use crate::worker::{ByteStream, WorkerExitWatch};
use bytes::Bytes;
use common::mjpeg::{frame_stream, is_diagnostic_failure, JpegDemuxer, MultipartEncoder};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 响应通道发送端
pub type FrameSink = mpsc::Sender<Bytes>;

/// 创建响应通道
pub fn sink_channel() -> (FrameSink, mpsc::Receiver<Bytes>) {
    mpsc::channel(1)
}

/// 转发循环
pub struct FrameRelay {
    pub camera_id: u32,
    pub demuxer: JpegDemuxer,
    pub encoder: MultipartEncoder,
    pub frames: Arc<AtomicU64>,
    pub cancel: CancellationToken,
    /// 每隔多少帧记录一次进度，0表示不记录
    pub log_interval: u64,
}

impl FrameRelay {
    /// 运行直到会话结束
    ///
    /// 返回 `None` 表示会话已被注册表关闭（取消令牌触发）。
    pub async fn run(
        self,
        stdout: ByteStream,
        sink: FrameSink,
        mut exit: WorkerExitWatch,
    ) -> Option<CloseReason> {
        let FrameRelay {
            camera_id,
            demuxer,
            encoder,
            frames,
            cancel,
            log_interval,
        } = self;

        let jpeg_frames = frame_stream(stdout, demuxer);
        tokio::pin!(jpeg_frames);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return None,

                _ = sink.closed() => return Some(CloseReason::ClientDisconnect),

                next = jpeg_frames.next() => match next {
                    Some(Ok(frame)) => {
                        let part = encoder.encode(&frame);
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return None,
                            sent = sink.send(part) => {
                                if sent.is_err() {
                                    return Some(CloseReason::SinkWrite);
                                }
                            }
                        }

                        let count = frames.fetch_add(1, Ordering::Relaxed) + 1;
                        if log_interval > 0 && count % log_interval == 0 {
                            info!("Camera {}: {} frames processed", camera_id, count);
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Error reading worker output for camera {}: {}", camera_id, e);
                        return Some(CloseReason::WorkerError(e.to_string()));
                    }
                    None => {
                        debug!("Worker output ended for camera {}", camera_id);
                        tokio::select! {
                            _ = cancel.cancelled() => return None,
                            status = exit.wait() => return Some(status.into()),
                        }
                    }
                },
            }
        }
    }
}

/// 监控诊断输出，仅记录日志，不影响会话状态
pub async fn watch_diagnostics(camera_id: u32, mut stderr: ByteStream) {
    while let Some(chunk) = stderr.next().await {
        match chunk {
            Ok(data) => {
                let text = String::from_utf8_lossy(&data);
                if is_diagnostic_failure(&text) {
                    warn!("FFmpeg stderr (Camera {}): {}", camera_id, text.trim());
                }
            }
            Err(e) => {
                debug!("Stopped reading stderr for camera {}: {}", camera_id, e);
                break;
            }
        }
    }
}
