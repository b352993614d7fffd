use crate::config::ConfigError;
use crate::http::ServerError;
use crate::supervisor::SupervisorError;

/// Top-level error returned by the binary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Process exit code for this error.
    ///
    /// Workers that never got to serve use the boot-error code so the
    /// supervisor stops instead of respawning them.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => crate::config::WORKER_BOOT_ERROR,
            Error::Server(e) if e.is_boot_error() => crate::config::WORKER_BOOT_ERROR,
            _ => 1,
        }
    }
}
