//! kiln module gateway server.
//!
//! Mounts a [`kiln_core::Gateway`] as axum middleware. Requests under the
//! gateway's public prefix are answered by the gateway; everything else, and
//! every miss, falls through to the API routes and the optional static
//! directory.

pub mod error;
pub mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use kiln_core::Gateway;

pub use error::{ServerError, ServerResult};
pub use routes::{AppState, create_router};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Directory served for requests the gateway does not handle.
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            static_dir: None,
        }
    }
}

impl ServerConfig {
    fn addr(&self) -> ServerResult<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ServerError::InvalidAddress(format!("{}:{}", self.host, self.port)))
    }
}

/// Serve `gateway` until Ctrl+C.
pub async fn serve(gateway: Gateway, config: ServerConfig) -> ServerResult<()> {
    if let Some(dir) = &config.static_dir
        && !dir.is_dir()
    {
        return Err(ServerError::StaticDirMissing(dir.clone()));
    }
    let addr = config.addr()?;

    let warming = gateway.prewarm();
    if warming > 0 {
        tracing::info!("Prewarming {} vendor packages", warming);
    }

    let state = Arc::new(AppState {
        gateway: gateway.clone(),
    });
    let app = create_router(state, config.static_dir.as_deref());

    tracing::info!(
        "Serving {} at http://{}{}",
        gateway.source_root().display(),
        addr,
        gateway.config().public_prefix
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal");
            let _ = shutdown_tx.send(());
        }
    });

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = shutdown_rx.await;
    });

    server.await?;

    // Prewarm builds persist their output; let them land before exiting.
    gateway.wait_for_prewarm().await;

    tracing::info!("Server shutdown complete");

    Ok(())
}
