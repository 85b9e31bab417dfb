use super::{EventSender, StreamConnection, StreamConnector, StreamEvent};
use crate::error::{ClientError, Result};
use common::mjpeg::JpegDemuxer;
use common::{CameraSummary, CAMERAS_PATH};
use futures::StreamExt;
use std::convert::Infallible;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 获取服务器的摄像头列表
pub async fn fetch_roster(client: &reqwest::Client, server: &str) -> Result<Vec<CameraSummary>> {
    let response = client.get(format!("{}{}", server, CAMERAS_PATH)).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::Status(status.as_u16()));
    }
    Ok(response.json().await?)
}

/// 基于reqwest流式GET的连接器
#[derive(Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
    stall_timeout: Duration,
}

impl HttpConnector {
    pub fn new(client: reqwest::Client, stall_timeout: Duration) -> Self {
        Self {
            client,
            stall_timeout,
        }
    }
}

impl StreamConnector for HttpConnector {
    fn open(&self, camera_id: u32, url: &str, events: EventSender) -> Box<dyn StreamConnection> {
        debug!("Opening stream for camera {}: {}", camera_id, url);

        let cancel = CancellationToken::new();
        tokio::spawn(watch_stream(
            self.client.clone(),
            url.to_string(),
            self.stall_timeout,
            events,
            cancel.clone(),
        ));
        Box::new(HttpConnection { cancel })
    }
}

struct HttpConnection {
    cancel: CancellationToken,
}

impl StreamConnection for HttpConnection {
    fn disconnect(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for HttpConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn watch_stream(
    client: reqwest::Client,
    url: String,
    stall_timeout: Duration,
    events: EventSender,
    cancel: CancellationToken,
) {
    let camera_id = events.camera_id();
    let outcome = tokio::select! {
        _ = cancel.cancelled() => None,
        result = read_stream(&client, &url, stall_timeout, &events) => Some(result),
    };

    match outcome {
        None => {
            debug!("Camera {} stream disconnected locally", camera_id);
            events.send(StreamEvent::Aborted);
        }
        Some(Err(e)) => {
            events.send(StreamEvent::Error(e.to_string()));
        }
        Some(Ok(never)) => match never {},
    }
}

/// 读取流直到出错；成功路径不会返回
async fn read_stream(
    client: &reqwest::Client,
    url: &str,
    stall_timeout: Duration,
    events: &EventSender,
) -> Result<Infallible> {
    let response = tokio::time::timeout(stall_timeout, client.get(url).send())
        .await
        .map_err(|_| ClientError::Stalled)??;

    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::Status(status.as_u16()));
    }

    let mut body = response.bytes_stream();
    let mut demuxer = JpegDemuxer::default();
    let mut deadline = Instant::now() + stall_timeout;
    let mut announced = false;

    loop {
        let chunk = tokio::time::timeout_at(deadline, body.next())
            .await
            .map_err(|_| ClientError::Stalled)?;

        match chunk {
            Some(chunk) => {
                let frames = demuxer.push(&chunk?);
                if frames.is_empty() {
                    continue;
                }
                deadline = Instant::now() + stall_timeout;
                if !announced {
                    announced = true;
                    info!("Camera {} receiving frames", events.camera_id());
                    events.send(StreamEvent::FrameReady);
                }
            }
            None => return Err(ClientError::StreamEnded),
        }
    }
}
