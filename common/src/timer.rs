// 视频墙 - 可取消定时器服务
//
// 每个调用方自己持有并取消自己的句柄，重新设置前必须先取消旧句柄，
// 保证每个摄像头同一时间最多只有一个有效定时器。

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::trace;

/// 定时器句柄
///
/// 丢弃句柄不会取消定时器，必须显式调用 `cancel`。
#[derive(Debug)]
pub struct TimerHandle {
    id: u64,
    abort: AbortHandle,
}

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 取消定时器；已经触发的定时器取消是空操作
    pub fn cancel(self) {
        trace!("Cancelling timer {}", self.id);
        self.abort.abort();
    }

    /// 定时器是否已经结束（触发完成或被取消）
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// 基于tokio的定时器服务
#[derive(Debug, Clone, Default)]
pub struct TimerService {
    next_id: Arc<AtomicU64>,
}

impl TimerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在 `delay` 之后执行 `callback`
    ///
    /// 必须在tokio运行时中调用。
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            trace!("Timer {} fired after {:?}", id, delay);
            callback.await;
        });

        TimerHandle {
            id,
            abort: task.abort_handle(),
        }
    }

    pub fn cancel(&self, handle: TimerHandle) {
        handle.cancel();
    }
}
