// 视频墙 - 外部转码进程管理
//
// 通过 `WorkerLauncher` 抽象启动外部转码进程（默认ffmpeg），
// 注册表和解复用逻辑只依赖 `WorkerHandle`，与具体进程API无关。

mod handle;
mod process;
#[cfg(test)]
pub mod testing;

pub use handle::{
    ByteStream, WorkerCommand, WorkerError, WorkerExit, WorkerExitWatch, WorkerHandle,
    WorkerKiller,
};
pub use process::ProcessLauncher;

/// 转码进程启动器
pub trait WorkerLauncher: Send + Sync + 'static {
    /// 启动进程；无法启动时同步返回错误
    fn spawn(&self, command: &WorkerCommand) -> Result<WorkerHandle, WorkerError>;
}
