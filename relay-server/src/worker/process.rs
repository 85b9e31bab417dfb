use super::handle::{
    kill_requested, WorkerCommand, WorkerError, WorkerExit, WorkerExitWatch, WorkerHandle,
    WorkerKiller,
};
use super::WorkerLauncher;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// 基于 `tokio::process` 的进程启动器
///
/// 终止时先发SIGTERM，让ffmpeg有机会关闭RTSP会话；超过 `kill_grace`
/// 仍未退出才强制终止。
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    kill_grace: Duration,
}

impl ProcessLauncher {
    pub fn new(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn spawn(&self, command: &WorkerCommand) -> Result<WorkerHandle, WorkerError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Starting worker ({}): {}", command.label, command);

        let mut child = cmd.spawn().map_err(|source| WorkerError::Spawn {
            program: command.program.clone(),
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or(WorkerError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(WorkerError::MissingPipe("stderr"))?;
        let pid = child.id();

        let (killer, kill_rx) = WorkerKiller::channel();
        let (exit_tx, exit_watch) = WorkerExitWatch::channel();

        tokio::spawn(supervise(
            child,
            command.label.clone(),
            self.kill_grace,
            kill_rx,
            exit_tx,
        ));

        info!("Worker started ({}), pid {:?}", command.label, pid);

        Ok(WorkerHandle::new(
            pid,
            Box::pin(ReaderStream::new(stdout)),
            Box::pin(ReaderStream::new(stderr)),
            killer,
            exit_watch,
        ))
    }
}

/// 监督任务：处理终止请求，回收子进程，发布唯一的终止事件
async fn supervise(
    mut child: Child,
    label: String,
    kill_grace: Duration,
    mut kill_rx: watch::Receiver<bool>,
    exit_tx: watch::Sender<Option<WorkerExit>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_requested(&mut kill_rx) => terminate(&mut child, &label, kill_grace).await,
    };

    let exit = match status {
        Ok(status) => WorkerExit::Exited(status.code()),
        Err(e) => {
            warn!("Failed to wait for worker ({}): {}", label, e);
            WorkerExit::Failed(e.to_string())
        }
    };

    debug!("Worker ({}) {}", label, exit);
    exit_tx.send_replace(Some(exit));
}

/// SIGTERM，宽限期内未退出再SIGKILL
async fn terminate(child: &mut Child, label: &str, kill_grace: Duration) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) => match tokio::time::timeout(kill_grace, child.wait()).await {
                    Ok(status) => return status,
                    Err(_) => warn!(
                        "Worker ({}) still running {:?} after SIGTERM, forcing kill",
                        label, kill_grace
                    ),
                },
                Err(e) => debug!("SIGTERM for worker ({}) not delivered: {}", label, e),
            }
        }
    }

    #[cfg(not(unix))]
    let _ = kill_grace;

    if let Err(e) = child.start_kill() {
        // 进程可能已经退出
        debug!("Kill for worker ({}) not delivered: {}", label, e);
    }
    child.wait().await
}
