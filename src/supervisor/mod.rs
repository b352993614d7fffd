//! Multi-process worker supervisor.
//!
//! The supervisor never serves HTTP itself. It spawns `workers` identical worker
//! processes that each bind the configured address, then watches them:
//!
//! - A current worker that exits is respawned in the same slot after a short delay
//! - A worker that exits with the boot-error code stops the supervisor
//! - Reload starts a new set of workers, then retires the old set
//! - Retiring a worker closes its stdin and kills it after the graceful timeout
//!
//! Worker exits are collected through a `JoinSet`, so all supervisor state is
//! owned by the single task running [`Supervisor::run`].

mod launcher;
mod signals;

use std::collections::HashMap;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::ChildStdin;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use crate::config::{AppConfig, ConfigError, WORKER_BOOT_ERROR, WORKER_RESPAWN_DELAY_MS};

pub use launcher::WorkerLauncher;
pub use signals::{forward_signals, Control};

/// Capacity of the control channel fed by signal handlers
const CONTROL_CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    #[error("Failed to spawn worker {id}: {source}")]
    Spawn {
        id: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker {id} failed to boot")]
    WorkerBoot { id: usize },
}

/// A running worker owned by the supervisor.
struct WorkerHandle {
    /// Unique per spawn; tells a current worker apart from a retired one in the same slot
    serial: u64,
    pid: Option<u32>,
    /// Dropping this closes the worker's stdin, which asks it to shut down
    stdin: Option<ChildStdin>,
    kill: oneshot::Sender<()>,
}

/// Reported by a worker's wait task once the process is gone.
struct WorkerExit {
    id: usize,
    serial: u64,
    pid: Option<u32>,
    status: std::io::Result<ExitStatus>,
}

pub struct Supervisor {
    launcher: WorkerLauncher,
    proc_name: String,
    bind: String,
    target: usize,
    grace: Duration,
    next_serial: u64,
    workers: HashMap<usize, WorkerHandle>,
    exits: JoinSet<WorkerExit>,
    /// Slots waiting out the respawn delay; each task yields its slot id
    respawns: JoinSet<usize>,
}

impl Supervisor {
    pub fn new(config: &AppConfig, launcher: WorkerLauncher) -> Result<Self, SupervisorError> {
        config.validate()?;

        Ok(Self {
            launcher,
            proc_name: config.server.proc_name.clone(),
            bind: config.server.bind.clone(),
            target: config.server.worker_count(),
            grace: Duration::from_secs(config.server.graceful_timeout_seconds),
            next_serial: 0,
            workers: HashMap::new(),
            exits: JoinSet::new(),
            respawns: JoinSet::new(),
        })
    }

    /// Supervise workers until a `Control::Shutdown` arrives or the channel closes.
    ///
    /// All workers have exited by the time this returns, whatever the outcome.
    pub async fn run(mut self, mut control: mpsc::Receiver<Control>) -> Result<(), SupervisorError> {
        tracing::info!(
            bind = %self.bind,
            workers = self.target,
            "Starting {} server",
            self.proc_name
        );

        let mut result = self.spawn_all();

        while result.is_ok() {
            tokio::select! {
                Some(joined) = self.exits.join_next() => {
                    match joined {
                        Ok(exit) => result = self.handle_exit(exit),
                        Err(e) => tracing::error!(error = %e, "Worker wait task failed"),
                    }
                }
                Some(Ok(id)) = self.respawns.join_next() => {
                    result = self.respawn(id);
                }
                received = control.recv() => {
                    match received {
                        Some(Control::Reload) => result = self.reload(),
                        Some(Control::Increment) => result = self.increment(),
                        Some(Control::Decrement) => self.decrement(),
                        Some(Control::Shutdown) | None => break,
                    }
                }
            }
        }

        self.shutdown().await;
        result
    }

    fn spawn_all(&mut self) -> Result<(), SupervisorError> {
        for id in 1..=self.target {
            self.spawn_worker(id)?;
        }
        Ok(())
    }

    fn spawn_worker(&mut self, id: usize) -> Result<(), SupervisorError> {
        let mut child = self
            .launcher
            .command(id)
            .spawn()
            .map_err(|source| SupervisorError::Spawn { id, source })?;

        let serial = self.next_serial;
        self.next_serial += 1;

        let pid = child.id();
        let stdin = child.stdin.take();
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

        self.exits.spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                Ok(()) = &mut kill_rx => {
                    tracing::warn!(worker = id, pid, "Worker did not stop in time, killing");
                    if let Err(e) = child.start_kill() {
                        tracing::error!(worker = id, pid, error = %e, "Failed to kill worker");
                    }
                    child.wait().await
                }
            };
            WorkerExit {
                id,
                serial,
                pid,
                status,
            }
        });

        tracing::info!(worker = id, pid, "Spawned worker");

        self.workers.insert(
            id,
            WorkerHandle {
                serial,
                pid,
                stdin,
                kill: kill_tx,
            },
        );
        Ok(())
    }

    /// Ask a worker to stop, and kill it if it is still around after the grace period.
    fn retire(&self, id: usize, handle: WorkerHandle) {
        tracing::debug!(worker = id, pid = handle.pid, "Retiring worker");

        let WorkerHandle { stdin, kill, .. } = handle;
        drop(stdin);

        let grace = self.grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            // Fails when the worker already exited
            let _ = kill.send(());
        });
    }

    fn handle_exit(&mut self, exit: WorkerExit) -> Result<(), SupervisorError> {
        let WorkerExit {
            id,
            serial,
            pid,
            status,
        } = exit;

        let code = match &status {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::error!(worker = id, pid, error = %e, "Failed to wait for worker");
                None
            }
        };

        let current = self.workers.get(&id).is_some_and(|w| w.serial == serial);
        if !current {
            tracing::info!(worker = id, pid, code, "Retired worker exited");
            return Ok(());
        }
        self.workers.remove(&id);

        if code == Some(WORKER_BOOT_ERROR) {
            tracing::error!(worker = id, pid, "Worker failed to boot, shutting down");
            return Err(SupervisorError::WorkerBoot { id });
        }

        tracing::warn!(worker = id, pid, code, "Worker exited unexpectedly, respawning");
        self.respawns.spawn(async move {
            tokio::time::sleep(Duration::from_millis(WORKER_RESPAWN_DELAY_MS)).await;
            id
        });
        Ok(())
    }

    /// Refill a slot once its respawn delay is over, unless a reload or a
    /// resize already dealt with it.
    fn respawn(&mut self, id: usize) -> Result<(), SupervisorError> {
        if id <= self.target && !self.workers.contains_key(&id) {
            self.spawn_worker(id)?;
        }
        Ok(())
    }

    fn reload(&mut self) -> Result<(), SupervisorError> {
        tracing::info!("Reloading {} server", self.proc_name);

        let old = std::mem::take(&mut self.workers);
        self.spawn_all()?;
        for (id, handle) in old {
            self.retire(id, handle);
        }
        Ok(())
    }

    fn increment(&mut self) -> Result<(), SupervisorError> {
        self.target += 1;
        tracing::info!(workers = self.target, "Increasing worker count");
        self.spawn_worker(self.target)
    }

    fn decrement(&mut self) {
        if self.target <= 1 {
            tracing::warn!("Refusing to go below one worker");
            return;
        }

        let id = self.target;
        self.target -= 1;
        tracing::info!(workers = self.target, "Decreasing worker count");
        if let Some(handle) = self.workers.remove(&id) {
            self.retire(id, handle);
        }
    }

    async fn shutdown(&mut self) {
        tracing::info!("Shutting down {} server", self.proc_name);
        self.respawns.abort_all();

        let workers = std::mem::take(&mut self.workers);
        for (id, handle) in workers {
            self.retire(id, handle);
        }

        while let Some(joined) = self.exits.join_next().await {
            if let Ok(exit) = joined {
                tracing::debug!(worker = exit.id, pid = exit.pid, "Worker stopped");
            }
        }

        tracing::info!("{} server stopped", self.proc_name);
    }

    /// Number of worker slots currently targeted.
    pub fn target(&self) -> usize {
        self.target
    }
}

/// Run the supervisor, driven by process signals.
pub async fn serve(config: &AppConfig, launcher: WorkerLauncher) -> Result<(), SupervisorError> {
    let supervisor = Supervisor::new(config, launcher)?;

    let (tx, rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
    forward_signals(tx).map_err(SupervisorError::Signals)?;

    supervisor.run(rx).await
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::path::Path;

    /// A launcher that runs `script` under `sh` instead of the real binary.
    /// The appended `worker --id N` arguments become `$1 $2 $3`.
    fn shell_launcher(script: &str) -> WorkerLauncher {
        WorkerLauncher::new(
            "sh",
            vec![
                OsString::from("-c"),
                OsString::from(script),
                OsString::from("sh"),
            ],
        )
    }

    fn config(workers: usize) -> AppConfig {
        let mut config = AppConfig::default();
        config.server.bind = "127.0.0.1:0".to_string();
        config.server.workers = Some(workers);
        config.server.graceful_timeout_seconds = 2;
        config
    }

    fn spawn_count(path: &Path) -> usize {
        std::fs::read_to_string(path)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    async fn wait_for_spawns(path: &Path, expected: usize) {
        for _ in 0..100 {
            if spawn_count(path) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!(
            "expected {} spawns, saw {}",
            expected,
            spawn_count(path)
        );
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = config(1);
        config.server.bind = "127.0.0.1:notaport".to_string();
        let result = Supervisor::new(&config, shell_launcher("exit 0"));
        assert!(matches!(result, Err(SupervisorError::Config(_))));
    }

    #[test]
    fn test_new_uses_configured_worker_count() {
        let supervisor = Supervisor::new(&config(3), shell_launcher("exit 0")).unwrap();
        assert_eq!(supervisor.target(), 3);
    }

    #[tokio::test]
    async fn test_boot_error_stops_supervisor() {
        let supervisor = Supervisor::new(&config(2), shell_launcher("exit 3")).unwrap();
        let (_tx, rx) = mpsc::channel(1);

        let result = tokio::time::timeout(Duration::from_secs(10), supervisor.run(rx))
            .await
            .unwrap();
        assert!(matches!(result, Err(SupervisorError::WorkerBoot { .. })));
    }

    #[tokio::test]
    async fn test_shutdown_retires_all_workers() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("spawns");
        let script = format!("echo $3 >> {}; cat > /dev/null", log.display());
        let supervisor = Supervisor::new(&config(3), shell_launcher(&script)).unwrap();
        let (tx, rx) = mpsc::channel(1);

        let run = tokio::spawn(supervisor.run(rx));
        wait_for_spawns(&log, 3).await;
        tx.send(Control::Shutdown).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(spawn_count(&log), 3);
    }

    #[tokio::test]
    async fn test_crashed_worker_is_respawned() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("spawns");
        // First two spawns crash, the third one stays up
        let script = format!(
            "echo $3 >> {log}; if [ $(wc -l < {log}) -lt 3 ]; then exit 1; fi; cat > /dev/null",
            log = log.display()
        );
        let supervisor = Supervisor::new(&config(1), shell_launcher(&script)).unwrap();
        let (tx, rx) = mpsc::channel(1);

        let run = tokio::spawn(supervisor.run(rx));
        wait_for_spawns(&log, 3).await;
        tx.send(Control::Shutdown).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(spawn_count(&log), 3);
    }

    #[tokio::test]
    async fn test_stuck_worker_is_killed_after_grace_period() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("spawns");
        // Detached from the pipe, so closing stdin does not stop it
        let script = format!("echo $3 >> {}; exec sleep 100 < /dev/null", log.display());
        let mut config = config(1);
        config.server.graceful_timeout_seconds = 1;
        let supervisor = Supervisor::new(&config, shell_launcher(&script)).unwrap();
        let (tx, rx) = mpsc::channel(1);

        let run = tokio::spawn(supervisor.run(rx));
        wait_for_spawns(&log, 1).await;

        let started = std::time::Instant::now();
        tx.send(Control::Shutdown).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(900), "killed too early: {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(5), "kill took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_shutdown_during_crash_loop() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("spawns");
        let script = format!("echo $3 >> {}; exit 1", log.display());
        let supervisor = Supervisor::new(&config(3), shell_launcher(&script)).unwrap();
        let (tx, rx) = mpsc::channel(1);

        let run = tokio::spawn(supervisor.run(rx));
        wait_for_spawns(&log, 6).await;
        tx.send(Control::Shutdown).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());

        // No respawn happens once shutdown has started
        let count = spawn_count(&log);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(spawn_count(&log), count);
    }

    #[tokio::test]
    async fn test_reload_replaces_every_worker() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("spawns");
        let script = format!("echo $3 >> {}; cat > /dev/null", log.display());
        let supervisor = Supervisor::new(&config(2), shell_launcher(&script)).unwrap();
        let (tx, rx) = mpsc::channel(4);

        let run = tokio::spawn(supervisor.run(rx));
        wait_for_spawns(&log, 2).await;
        tx.send(Control::Reload).await.unwrap();
        wait_for_spawns(&log, 4).await;
        tx.send(Control::Shutdown).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(spawn_count(&log), 4);
    }

    #[tokio::test]
    async fn test_worker_count_can_grow() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("spawns");
        let script = format!("echo $3 >> {}; cat > /dev/null", log.display());
        let supervisor = Supervisor::new(&config(1), shell_launcher(&script)).unwrap();
        let (tx, rx) = mpsc::channel(4);

        let run = tokio::spawn(supervisor.run(rx));
        wait_for_spawns(&log, 1).await;
        tx.send(Control::Increment).await.unwrap();
        wait_for_spawns(&log, 2).await;
        tx.send(Control::Decrement).await.unwrap();
        tx.send(Control::Decrement).await.unwrap();
        tx.send(Control::Shutdown).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());

        let ids = std::fs::read_to_string(&log).unwrap();
        let ids: Vec<&str> = ids.lines().collect();
        assert_eq!(ids, ["1", "2"]);
    }
}
