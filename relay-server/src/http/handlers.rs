use crate::session::SessionRegistry;
use crate::streaming::{CloseReason, StreamError};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::{CameraStreamStats, CameraSummary, CleanupResponse, HealthResponse};
use futures::StreamExt;
use std::convert::Infallible;
use std::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(registry: SessionRegistry) -> Self {
        Self {
            registry,
            started_at: Instant::now(),
        }
    }
}

fn parse_camera_id(raw: &str) -> Result<u32, Response> {
    raw.parse::<u32>().map_err(|_| {
        debug!("Rejecting invalid camera id {:?}", raw);
        (StatusCode::BAD_REQUEST, "Invalid camera id").into_response()
    })
}

/// MJPEG直播流
pub async fn stream_camera(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Response, Response> {
    let camera_id = parse_camera_id(&id)?;

    let stream = state
        .registry
        .open_session(camera_id)
        .await
        .map_err(StreamError::into_response)?;

    info!(
        "Stream request for camera {} accepted (session {})",
        camera_id, stream.ticket.session_id
    );

    let body = Body::from_stream(ReceiverStream::new(stream.body).map(Ok::<_, Infallible>));

    Ok((
        [
            (header::CONTENT_TYPE, stream.content_type),
            (header::CACHE_CONTROL, "no-cache".to_string()),
            (header::CONNECTION, "close".to_string()),
            (header::PRAGMA, "no-cache".to_string()),
        ],
        body,
    )
        .into_response())
}

/// 摄像头列表（不包含源地址）
pub async fn list_cameras(State(state): State<AppState>) -> Json<Vec<CameraSummary>> {
    Json(state.registry.roster().summaries())
}

/// 健康检查
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let streams_by_camera = state
        .registry
        .snapshot()
        .into_iter()
        .map(|(camera_id, info)| {
            (
                camera_id,
                CameraStreamStats {
                    count: 1,
                    uptime_seconds: info.uptime_seconds,
                    session_id: info.session_id.to_string(),
                    started_at: info.started_at.to_rfc3339(),
                    frames: info.frames,
                },
            )
        })
        .collect();

    Json(HealthResponse {
        status: "ok".to_string(),
        active_streams: state.registry.active_count(),
        streams_by_camera,
        uptime: state.started_at.elapsed().as_secs(),
        configured_cameras: state.registry.roster().len(),
    })
}

/// 强制关闭摄像头的流
pub async fn cleanup(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<CleanupResponse>, Response> {
    let camera_id = parse_camera_id(&id)?;

    match state.registry.ticket(camera_id) {
        Some(ticket) => {
            info!(
                "Cleanup requested for camera {} (session {})",
                camera_id, ticket.session_id
            );
            state
                .registry
                .close_session(ticket, CloseReason::CleanupRequested);
        }
        None => debug!("Cleanup requested for camera {} with no active stream", camera_id),
    }
    Ok(Json(CleanupResponse::for_camera(camera_id)))
}

pub async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}
