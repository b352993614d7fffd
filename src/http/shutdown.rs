//! Graceful shutdown and signal handling for workers.
//!
//! Handles:
//! - SIGTERM: Graceful shutdown with connection draining
//! - stdin EOF: The supervisor retired this worker, or went away
//! - SIGINT: Ignored; a terminal Ctrl+C reaches the whole process group and
//!   the supervisor decides when its workers stop

use std::time::Duration;

use axum_server::Handle;

/// Setup graceful shutdown on SIGTERM and on end-of-file from the supervisor.
///
/// When either happens, the server will:
/// 1. Stop accepting new connections
/// 2. Wait up to `grace` for existing connections to complete
/// 3. Shutdown
pub fn setup_shutdown_handler(handle: Handle, grace: Duration) {
    ignore_interrupts();

    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let supervisor_gone = async {
            let mut stdin = tokio::io::stdin();
            if let Err(e) = tokio::io::copy(&mut stdin, &mut tokio::io::sink()).await {
                tracing::debug!(error = %e, "Supervisor pipe closed with error");
            }
        };

        tokio::select! {
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = supervisor_gone => {
                tracing::info!("Supervisor closed worker pipe, initiating graceful shutdown");
            }
        }

        handle.graceful_shutdown(Some(grace));
        tracing::info!(
            grace_secs = grace.as_secs(),
            "Graceful shutdown initiated, waiting for connections to close"
        );
    });
}

/// Swallow Ctrl+C so it does not kill the worker behind the supervisor's back.
fn ignore_interrupts() {
    tokio::spawn(async {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
                return;
            }
            tracing::debug!("Ignoring Ctrl+C, waiting for supervisor");
        }
    });
}
