// 测试用转码进程：输出由测试代码控制

use super::handle::{
    kill_requested, WorkerCommand, WorkerError, WorkerExit, WorkerExitWatch, WorkerHandle,
    WorkerKiller,
};
use super::WorkerLauncher;
use bytes::Bytes;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream};

enum FakeOutput {
    Stdout(Bytes),
    Stderr(Bytes),
    Exit(i32),
}

/// 已启动的测试进程
#[derive(Clone)]
pub struct FakeWorker {
    pub command: WorkerCommand,
    feed: mpsc::UnboundedSender<FakeOutput>,
    killer: WorkerKiller,
    exit: WorkerExitWatch,
}

impl FakeWorker {
    pub fn send_stdout(&self, data: impl Into<Bytes>) {
        let _ = self.feed.send(FakeOutput::Stdout(data.into()));
    }

    pub fn send_stderr(&self, data: impl Into<Bytes>) {
        let _ = self.feed.send(FakeOutput::Stderr(data.into()));
    }

    /// 模拟进程自行退出
    pub fn exit(&self, code: i32) {
        let _ = self.feed.send(FakeOutput::Exit(code));
    }

    pub fn is_killed(&self) -> bool {
        self.killer.is_kill_requested()
    }

    pub fn exit_status(&self) -> Option<WorkerExit> {
        self.exit.current()
    }
}

#[derive(Default)]
pub struct FakeLauncher {
    workers: Mutex<Vec<FakeWorker>>,
    fail_spawn: AtomicBool,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 之后的启动都返回错误
    pub fn fail_spawns(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    pub fn workers(&self) -> Vec<FakeWorker> {
        self.workers.lock().unwrap().clone()
    }

    pub fn worker(&self, index: usize) -> FakeWorker {
        self.workers.lock().unwrap()[index].clone()
    }

    pub fn launched(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    /// 未被终止的进程数
    pub fn alive(&self) -> usize {
        self.workers
            .lock()
            .unwrap()
            .iter()
            .filter(|w| !w.is_killed() && w.exit_status().is_none())
            .count()
    }
}

impl WorkerLauncher for FakeLauncher {
    fn spawn(&self, command: &WorkerCommand) -> Result<WorkerHandle, WorkerError> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(WorkerError::Spawn {
                program: command.program.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
            });
        }

        let (stdout_tx, stdout_rx) = mpsc::channel::<io::Result<Bytes>>(16);
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel::<io::Result<Bytes>>();
        let (feed, mut feed_rx) = mpsc::unbounded_channel::<FakeOutput>();
        let (killer, mut kill_rx) = WorkerKiller::channel();
        let (exit_tx, exit_watch) = WorkerExitWatch::channel();

        tokio::spawn(async move {
            let exit = loop {
                tokio::select! {
                    _ = kill_requested(&mut kill_rx) => break WorkerExit::Exited(None),
                    output = feed_rx.recv() => match output {
                        Some(FakeOutput::Stdout(data)) => {
                            let _ = stdout_tx.send(Ok(data)).await;
                        }
                        Some(FakeOutput::Stderr(data)) => {
                            let _ = stderr_tx.send(Ok(data));
                        }
                        Some(FakeOutput::Exit(code)) => break WorkerExit::Exited(Some(code)),
                        None => {
                            kill_requested(&mut kill_rx).await;
                            break WorkerExit::Exited(None);
                        }
                    },
                }
            };
            drop(stdout_tx);
            drop(stderr_tx);
            exit_tx.send_replace(Some(exit));
        });

        self.workers.lock().unwrap().push(FakeWorker {
            command: command.clone(),
            feed,
            killer: killer.clone(),
            exit: exit_watch.clone(),
        });

        Ok(WorkerHandle::new(
            None,
            Box::pin(ReceiverStream::new(stdout_rx)),
            Box::pin(UnboundedReceiverStream::new(stderr_rx)),
            killer,
            exit_watch,
        ))
    }
}
