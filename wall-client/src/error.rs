use thiserror::Error;

/// 流连接错误，最终都表现为连接失败事件
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {0}")]
    Status(u16),

    #[error("No frame received within the stall timeout")]
    Stalled,

    #[error("Stream ended")]
    StreamEnded,
}

pub type Result<T> = std::result::Result<T, ClientError>;
