use clap::{value_parser, Arg, ArgMatches, Command};
use common::{Result, WallError};
use std::time::Duration;

/// 自动重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub step_delay: Duration,
}

impl ReconnectPolicy {
    /// 第 `previous_attempts + 1` 次重试前的等待时间
    pub fn delay_for(&self, previous_attempts: u32) -> Duration {
        self.base_delay + self.step_delay * previous_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(3000),
            step_delay: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// 中继服务器地址，例如 `http://127.0.0.1:3000`
    pub server: String,
    pub policy: ReconnectPolicy,
    /// 每个摄像头连接前的错开间隔（乘以花名册位置）
    pub stagger: Duration,
    pub manual_delay: Duration,
    pub reconnect_all_stagger: Duration,
    /// 超过此时间没有收到完整帧视为连接失败
    pub stall_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "http://127.0.0.1:3000".to_string(),
            policy: ReconnectPolicy::default(),
            stagger: Duration::from_millis(100),
            manual_delay: Duration::from_millis(500),
            reconnect_all_stagger: Duration::from_millis(1000),
            stall_timeout: Duration::from_millis(15000),
        }
    }
}

fn millis_arg(name: &'static str, help: &'static str, default: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .value_name("MS")
        .help(help)
        .value_parser(value_parser!(u64))
        .default_value(default)
}

impl ClientConfig {
    pub fn command() -> Command {
        Command::new("Video Wall Client")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Watches every camera stream of a relay server and reconnects on failure")
            .arg(
                Arg::new("server")
                    .short('s')
                    .long("server")
                    .value_name("URL")
                    .help("Relay server base URL")
                    .default_value("http://127.0.0.1:3000"),
            )
            .arg(
                Arg::new("max-attempts")
                    .long("max-attempts")
                    .value_name("N")
                    .help("Automatic retries before giving up")
                    .value_parser(value_parser!(u32))
                    .default_value("5"),
            )
            .arg(millis_arg("base-delay-ms", "Delay before the first retry", "3000"))
            .arg(millis_arg("step-delay-ms", "Extra delay added per retry", "2000"))
            .arg(millis_arg("stagger-ms", "Connect stagger per roster position", "100"))
            .arg(millis_arg("manual-delay-ms", "Delay before a manual reconnect", "500"))
            .arg(millis_arg(
                "reconnect-all-stagger-ms",
                "Stagger between cameras on reconnect-all",
                "1000",
            ))
            .arg(millis_arg(
                "stall-timeout-ms",
                "Fail a stream when no frame arrives within this time",
                "15000",
            ))
    }

    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let defaults = Self::default();
        let millis = |name: &str, default: Duration| {
            matches
                .get_one::<u64>(name)
                .map(|ms| Duration::from_millis(*ms))
                .unwrap_or(default)
        };

        let server = matches
            .get_one::<String>("server")
            .cloned()
            .unwrap_or(defaults.server)
            .trim_end_matches('/')
            .to_string();
        if !server.starts_with("http://") && !server.starts_with("https://") {
            return Err(WallError::InvalidParameter(format!(
                "server must be an http(s) URL: {}",
                server
            )));
        }

        let config = Self {
            server,
            policy: ReconnectPolicy {
                max_attempts: matches
                    .get_one::<u32>("max-attempts")
                    .copied()
                    .unwrap_or(defaults.policy.max_attempts),
                base_delay: millis("base-delay-ms", defaults.policy.base_delay),
                step_delay: millis("step-delay-ms", defaults.policy.step_delay),
            },
            stagger: millis("stagger-ms", defaults.stagger),
            manual_delay: millis("manual-delay-ms", defaults.manual_delay),
            reconnect_all_stagger: millis("reconnect-all-stagger-ms", defaults.reconnect_all_stagger),
            stall_timeout: millis("stall-timeout-ms", defaults.stall_timeout),
        };

        if config.stall_timeout.is_zero() {
            return Err(WallError::ConfigError(
                "stall-timeout-ms must be greater than 0".to_string(),
            ));
        }

        Ok(config)
    }
}
