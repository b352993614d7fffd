//! Worker server startup logic.

use std::net::SocketAddr;
use std::time::Duration;

use axum_server::Handle;
use tokio::net::TcpSocket;

use crate::config::{AppConfig, ConfigError};
use crate::routes::create_router;

use super::shutdown;

/// Server startup error
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Server(String),
}

impl ServerError {
    /// Errors that happen before the worker could serve a single request.
    pub fn is_boot_error(&self) -> bool {
        matches!(self, ServerError::Config(_) | ServerError::Bind { .. })
    }
}

/// Create a listening socket that other workers can bind as well.
///
/// Must be called from within a Tokio runtime.
pub fn bind_listener(addr: SocketAddr, backlog: u32) -> Result<std::net::TcpListener, ServerError> {
    let bind_err = |source: std::io::Error| ServerError::Bind { addr, source };

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_err)?;

    socket.set_reuseaddr(true).map_err(bind_err)?;
    #[cfg(unix)]
    socket.set_reuseport(true).map_err(bind_err)?;

    socket.bind(addr).map_err(bind_err)?;
    let listener = socket.listen(backlog).map_err(bind_err)?;
    listener.into_std().map_err(bind_err)
}

/// Run one worker until it is asked to shut down.
///
/// This function blocks until the server has drained its connections.
pub async fn start_worker(config: &AppConfig, worker_id: usize) -> Result<(), ServerError> {
    let addr = config.server.socket_addr()?;
    let listener = bind_listener(addr, config.server.backlog)?;

    tracing::info!(
        worker = worker_id,
        pid = std::process::id(),
        %addr,
        "Booting worker"
    );

    let handle = Handle::new();
    shutdown::setup_shutdown_handler(
        handle.clone(),
        Duration::from_secs(config.server.graceful_timeout_seconds),
    );

    let app = create_router(&config.server);

    axum_server::from_tcp(listener)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| ServerError::Server(e.to_string()))?;

    tracing::info!(worker = worker_id, pid = std::process::id(), "Worker exiting");
    Ok(())
}
