// 视频墙客户端 - 交互式控制台
//
// 从标准输入读取操作员命令，对应网页上的单个重连按钮、全部重连按钮。

use crate::display::LogDisplay;
use crate::reconnect::CameraMonitor;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Reconnect(u32),
    ReconnectAll,
    Status,
    Help,
    Quit,
}

impl OperatorCommand {
    /// 解析一行输入；空行返回 `Ok(None)`
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = parts.first() else {
            return Ok(None);
        };

        let command = match (*first, parts.len()) {
            ("reconnect", 2) => {
                let camera_id = parts[1]
                    .parse::<u32>()
                    .map_err(|_| format!("Invalid camera id: {}", parts[1]))?;
                OperatorCommand::Reconnect(camera_id)
            }
            ("reconnect", _) => return Err("Usage: reconnect <camera_id>".to_string()),
            ("reconnect-all", 1) => OperatorCommand::ReconnectAll,
            ("status", 1) => OperatorCommand::Status,
            ("help", 1) => OperatorCommand::Help,
            ("quit", 1) | ("exit", 1) => OperatorCommand::Quit,
            (other, _) => return Err(format!("Unknown command: {}", other)),
        };
        Ok(Some(command))
    }
}

fn print_help() {
    info!("Available commands:");
    info!("  reconnect <camera_id> - Reconnect one camera now");
    info!("  reconnect-all - Reconnect every camera with staggered timing");
    info!("  status - Show the connection state of every camera");
    info!("  quit - Disconnect all cameras and exit");
}

/// 执行一条命令，返回 false 表示退出
pub fn execute(monitor: &CameraMonitor, display: &LogDisplay, command: OperatorCommand) -> bool {
    match command {
        OperatorCommand::Reconnect(camera_id) => {
            monitor.manual_reconnect(camera_id);
        }
        OperatorCommand::ReconnectAll => monitor.reconnect_all(),
        OperatorCommand::Status => {
            for camera in monitor.snapshot() {
                let shown = display
                    .latest(camera.camera_id)
                    .map(|status| status.to_string())
                    .unwrap_or_default();
                match serde_json::to_string(&camera) {
                    Ok(json) => info!("{} {}", json, shown),
                    Err(e) => error!("Failed to encode status: {}", e),
                }
            }
        }
        OperatorCommand::Help => print_help(),
        OperatorCommand::Quit => return false,
    }
    true
}

/// 运行控制台直到 `quit` 或标准输入关闭
pub async fn run(monitor: CameraMonitor, display: Arc<LogDisplay>) -> std::io::Result<()> {
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match OperatorCommand::parse(&line) {
            Ok(Some(command)) => {
                if !execute(&monitor, &display, command) {
                    break;
                }
            }
            Ok(None) => continue,
            Err(message) => warn!("{}", message),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            OperatorCommand::parse("reconnect 3"),
            Ok(Some(OperatorCommand::Reconnect(3)))
        );
        assert_eq!(
            OperatorCommand::parse("  reconnect-all  "),
            Ok(Some(OperatorCommand::ReconnectAll))
        );
        assert_eq!(OperatorCommand::parse("status"), Ok(Some(OperatorCommand::Status)));
        assert_eq!(OperatorCommand::parse("exit"), Ok(Some(OperatorCommand::Quit)));
        assert_eq!(OperatorCommand::parse("   "), Ok(None));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(OperatorCommand::parse("reconnect").is_err());
        assert!(OperatorCommand::parse("reconnect abc").is_err());
        assert!(OperatorCommand::parse("status now").is_err());
        assert_eq!(
            OperatorCommand::parse("dance"),
            Err("Unknown command: dance".to_string())
        );
    }
}
