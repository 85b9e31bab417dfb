use bytes::Bytes;
use futures::stream::Stream;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

/// 进程输出字节流
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// 转码命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
    /// 日志标签（通常是摄像头ID）
    pub label: String,
}

impl fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.program, self.args.join(" "))
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Worker {0} pipe unavailable")]
    MissingPipe(&'static str),
}

/// 进程的终止事件，每个进程生命周期恰好一次
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// 进程退出；被信号终止时没有退出码
    Exited(Option<i32>),
    /// 等待进程时出错
    Failed(String),
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerExit::Exited(Some(code)) => write!(f, "exited with code {}", code),
            WorkerExit::Exited(None) => write!(f, "terminated by signal"),
            WorkerExit::Failed(cause) => write!(f, "failed: {}", cause),
        }
    }
}

/// 终止进程的句柄，可克隆，幂等
#[derive(Debug, Clone)]
pub struct WorkerKiller {
    tx: Arc<watch::Sender<bool>>,
}

impl WorkerKiller {
    /// 返回终止器和供监督任务等待的接收端
    pub fn channel() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// 发送终止请求，只发送一次，不等待进程退出
    ///
    /// 返回本次调用是否是第一次请求。
    pub fn kill(&self) -> bool {
        let first = self.tx.send_if_modified(|killed| {
            if *killed {
                false
            } else {
                *killed = true;
                true
            }
        });
        if first {
            debug!("Kill requested for worker");
        }
        first
    }

    pub fn is_kill_requested(&self) -> bool {
        *self.tx.borrow()
    }
}

/// 等待终止请求；所有终止器都被丢弃时永远挂起
pub(crate) async fn kill_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|killed| *killed).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// 终止事件观察者，可克隆
#[derive(Debug, Clone)]
pub struct WorkerExitWatch {
    rx: watch::Receiver<Option<WorkerExit>>,
}

impl WorkerExitWatch {
    pub fn channel() -> (watch::Sender<Option<WorkerExit>>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self { rx })
    }

    /// 已发生的终止事件
    pub fn current(&self) -> Option<WorkerExit> {
        self.rx.borrow().clone()
    }

    /// 等待终止事件
    pub async fn wait(&mut self) -> WorkerExit {
        match self.rx.wait_for(|exit| exit.is_some()).await {
            Ok(exit) => (*exit)
                .clone()
                .unwrap_or_else(|| WorkerExit::Failed("missing exit status".to_string())),
            Err(_) => WorkerExit::Failed("worker supervisor dropped".to_string()),
        }
    }
}

/// 运行中的转码进程
pub struct WorkerHandle {
    pid: Option<u32>,
    stdout: Option<ByteStream>,
    stderr: Option<ByteStream>,
    killer: WorkerKiller,
    exit: WorkerExitWatch,
}

impl WorkerHandle {
    pub fn new(
        pid: Option<u32>,
        stdout: ByteStream,
        stderr: ByteStream,
        killer: WorkerKiller,
        exit: WorkerExitWatch,
    ) -> Self {
        Self {
            pid,
            stdout: Some(stdout),
            stderr: Some(stderr),
            killer,
            exit,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// 取出标准输出流（只能取一次）
    pub fn take_stdout(&mut self) -> Option<ByteStream> {
        self.stdout.take()
    }

    /// 取出诊断输出流（只能取一次）
    pub fn take_stderr(&mut self) -> Option<ByteStream> {
        self.stderr.take()
    }

    pub fn killer(&self) -> WorkerKiller {
        self.killer.clone()
    }

    pub fn exit_watch(&self) -> WorkerExitWatch {
        self.exit.clone()
    }

    pub fn kill(&self) -> bool {
        self.killer.kill()
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("pid", &self.pid)
            .field("kill_requested", &self.killer.is_kill_requested())
            .field("exit", &self.exit.current())
            .finish()
    }
}
