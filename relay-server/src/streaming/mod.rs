// 视频墙 - Streaming模块
//
// 转码进程输出到HTTP响应的转发。
//
// # 核心组件
//
// - `FrameRelay`: 拆帧、封装并写入响应通道
// - `watch_diagnostics`: 诊断输出监控
// - `StreamError` / `CloseReason`: 请求错误与会话结束原因

pub mod error;
pub mod relay;

pub use error::{CloseReason, StreamError};
pub use relay::{sink_channel, watch_diagnostics, FrameRelay, FrameSink};
