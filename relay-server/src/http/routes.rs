use super::handlers::{self, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use std::path::Path;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState, static_dir: Option<&Path>) -> Router {
    let router = Router::new()
        // 直播流
        .route("/camera/:id/stream", get(handlers::stream_camera))

        // 摄像头与状态
        .route("/api/cameras", get(handlers::list_cameras))
        .route("/api/health", get(handlers::health))
        .route("/api/camera/:id/cleanup", post(handlers::cleanup))

        .route("/favicon.ico", get(handlers::favicon))
        .with_state(state);

    // 静态页面
    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
