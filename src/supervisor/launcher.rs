//! Worker process launch recipe.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

/// How to start a worker: a program plus the arguments that pin it to the
/// supervisor's resolved configuration. The worker id is appended last.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-execute the running binary in worker mode.
    pub fn current_exe(
        config_path: Option<&Path>,
        log_level: Option<&str>,
        bind: &str,
    ) -> std::io::Result<Self> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(path) = config_path {
            args.push("--config".into());
            args.push(path.into());
        }
        if let Some(level) = log_level {
            args.push("--log-level".into());
            args.push(level.into());
        }
        args.push("--bind".into());
        args.push(bind.into());

        Ok(Self::new(std::env::current_exe()?, args))
    }

    /// Build the command for worker `id`.
    ///
    /// stdin is piped: the supervisor keeps the write end, and the worker
    /// shuts down once it reads end-of-file.
    pub fn command(&self, id: usize) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("worker")
            .arg("--id")
            .arg(id.to_string())
            .stdin(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}
