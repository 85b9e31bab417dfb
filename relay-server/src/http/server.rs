use super::handlers::AppState;
use crate::session::SessionRegistry;
use common::Result;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

#[derive(Clone)]
pub struct HttpServer {
    addr: SocketAddr,
    registry: SessionRegistry,
    static_dir: Option<PathBuf>,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, registry: SessionRegistry, static_dir: Option<PathBuf>) -> Self {
        Self {
            addr,
            registry,
            static_dir,
        }
    }

    /// 运行直到 `shutdown` 完成，然后等待已有连接结束
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = super::routes::create_router(
            AppState::new(self.registry),
            self.static_dir.as_deref(),
        );

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!("HTTP server running on http://{}", self.addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }
}
