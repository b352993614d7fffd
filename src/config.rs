//! Configuration loading and constants.
//!
//! Loads the optional TOML configuration file and defines the defaults used when
//! a value is not supplied by the file, the environment, or the command line.
//! `AppConfig` is the root configuration struct shared by the supervisor and
//! its workers.

use const_format::formatcp;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::Path;

// =============================================================================
// Service Identity
// =============================================================================

/// Service name reported by the root status endpoint
pub const SERVICE_NAME: &str = "dance-monkey-api";

/// Default process name used in supervisor log lines
pub const DEFAULT_PROC_NAME: &str = "dance-monkey";

// =============================================================================
// Server Socket
// =============================================================================

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;

/// Default bind address when neither config nor `GUNICORN_BIND` sets one
pub const DEFAULT_BIND: &str = formatcp!("{}:{}", DEFAULT_HOST, DEFAULT_PORT);

/// Environment variable overriding the bind address
pub const ENV_BIND: &str = "GUNICORN_BIND";

/// Environment variable overriding the worker count
pub const ENV_WORKERS: &str = "GUNICORN_WORKERS";

/// Maximum number of pending connections on the listen socket
pub const DEFAULT_BACKLOG: u32 = 2048;

// =============================================================================
// Worker Timeouts
// =============================================================================

/// Per-request wall-clock limit in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Time a retiring worker gets to drain connections before it is killed
pub const DEFAULT_GRACEFUL_TIMEOUT_SECS: u64 = 30;

/// Exit code a worker uses when it cannot boot (e.g. the bind fails).
/// The supervisor stops instead of respawning when it sees this code.
pub const WORKER_BOOT_ERROR: i32 = 3;

/// Pause before respawning a crashed worker, so a crash loop does not spin
pub const WORKER_RESPAWN_DELAY_MS: u64 = 100;

// =============================================================================
// Response Headers
// =============================================================================

/// Status answers must never be served from an intermediate cache
pub const CACHE_CONTROL_NO_STORE: &str = "no-store";

// =============================================================================
// Logging
// =============================================================================

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "dance_monkey=info";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Socket and worker settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Socket and worker process settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on, `host:port`
    #[serde(default = "ServerConfig::default_bind")]
    pub bind: String,
    /// Listen backlog
    #[serde(default = "ServerConfig::default_backlog")]
    pub backlog: u32,
    /// Number of worker processes (default: 2 x CPU count + 1)
    pub workers: Option<usize>,
    /// Per-request timeout in seconds
    #[serde(default = "ServerConfig::default_timeout")]
    pub timeout_seconds: u64,
    /// Drain period for retiring workers in seconds
    #[serde(default = "ServerConfig::default_graceful_timeout")]
    pub graceful_timeout_seconds: u64,
    /// Name used in lifecycle log lines
    #[serde(default = "ServerConfig::default_proc_name")]
    pub proc_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: Self::default_bind(),
            backlog: Self::default_backlog(),
            workers: None,
            timeout_seconds: Self::default_timeout(),
            graceful_timeout_seconds: Self::default_graceful_timeout(),
            proc_name: Self::default_proc_name(),
        }
    }
}

impl ServerConfig {
    fn default_bind() -> String {
        DEFAULT_BIND.to_string()
    }

    fn default_backlog() -> u32 {
        DEFAULT_BACKLOG
    }

    fn default_timeout() -> u64 {
        DEFAULT_TIMEOUT_SECS
    }

    fn default_graceful_timeout() -> u64 {
        DEFAULT_GRACEFUL_TIMEOUT_SECS
    }

    fn default_proc_name() -> String {
        DEFAULT_PROC_NAME.to_string()
    }

    /// Get worker count (configured, or 2 x CPU count + 1)
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(default_worker_count)
    }

    /// Resolve the bind address.
    ///
    /// Accepts `ip:port`, `host:port`, or a bare ip / host, which listens on
    /// `DEFAULT_PORT`. Host names resolve to their first address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let invalid = |reason: String| {
            ConfigError::Validation(format!("Invalid bind address '{}': {}", self.bind, reason))
        };

        let bind = self.bind.trim();
        if let Ok(addr) = bind.parse::<SocketAddr>() {
            return Ok(addr);
        }

        // Bare ip, IPv6 optionally in brackets
        let bare = bind.strip_prefix('[').and_then(|b| b.strip_suffix(']')).unwrap_or(bind);
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, DEFAULT_PORT));
        }

        let mut addrs = if bind.contains(':') {
            bind.to_socket_addrs()
        } else {
            (bind, DEFAULT_PORT).to_socket_addrs()
        }
        .map_err(|e| invalid(e.to_string()))?;

        addrs
            .next()
            .ok_or_else(|| invalid("resolved to no addresses".to_string()))
    }
}

/// Worker count used when none is configured.
pub fn default_worker_count() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpus * 2 + 1
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }

    pub fn is_json(&self) -> bool {
        self.format == "json"
    }
}

impl AppConfig {
    /// Load configuration from `path`, or use defaults when no file is given.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)?;
                toml::from_str(&contents)?
            }
            None => AppConfig::default(),
        };

        Ok(config)
    }

    /// Apply command line / environment overrides on top of the file values.
    pub fn apply_overrides(&mut self, bind: Option<String>, workers: Option<usize>) {
        if let Some(bind) = bind {
            self.server.bind = bind;
        }
        if workers.is_some() {
            self.server.workers = workers;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.socket_addr()?;

        if self.server.worker_count() == 0 {
            return Err(ConfigError::Validation(
                "Worker count must be at least 1".to_string(),
            ));
        }
        if self.server.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "server.timeout_seconds must be at least 1".to_string(),
            ));
        }
        if self.server.graceful_timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "server.graceful_timeout_seconds must be at least 1".to_string(),
            ));
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(ConfigError::Validation(format!(
                "Unknown logging.format '{}', expected \"text\" or \"json\"",
                self.logging.format
            )));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
}
