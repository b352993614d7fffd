//! Supervisor signal handling.
//!
//! Translates process signals into `Control` messages:
//! - SIGINT/SIGTERM: shut down all workers and exit
//! - SIGHUP: graceful reload (new workers first, then retire the old ones)
//! - SIGTTIN/SIGTTOU: one worker more / one worker less
//!
//! Only Ctrl+C is available on non-Unix platforms.

use tokio::sync::mpsc;

/// A request to the supervisor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Reload,
    Increment,
    Decrement,
    Shutdown,
}

// Values from <signal.h>; identical on Linux, macOS and the BSDs.
#[cfg(unix)]
const SIGTTIN: i32 = 21;
#[cfg(unix)]
const SIGTTOU: i32 = 22;

/// Install signal handlers and forward them to `tx` until the receiver is gone.
#[cfg(unix)]
pub fn forward_signals(tx: mpsc::Sender<Control>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut ttin = signal(SignalKind::from_raw(SIGTTIN))?;
    let mut ttou = signal(SignalKind::from_raw(SIGTTOU))?;

    tokio::spawn(async move {
        loop {
            let control = tokio::select! {
                _ = interrupt.recv() => {
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
                    Control::Shutdown
                }
                _ = terminate.recv() => {
                    tracing::info!("Received SIGTERM, initiating graceful shutdown");
                    Control::Shutdown
                }
                _ = hangup.recv() => {
                    tracing::info!("Received SIGHUP, reloading workers");
                    Control::Reload
                }
                _ = ttin.recv() => Control::Increment,
                _ = ttou.recv() => Control::Decrement,
            };

            if tx.send(control).await.is_err() {
                break;
            }
        }
    });

    Ok(())
}

#[cfg(not(unix))]
pub fn forward_signals(tx: mpsc::Sender<Control>) -> std::io::Result<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                return;
            }
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            if tx.send(Control::Shutdown).await.is_err() {
                break;
            }
        }
    });

    Ok(())
}
