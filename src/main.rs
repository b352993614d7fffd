//! dance-monkey: the status API entry point.
//!
//! Parses the command line, initializes tracing, resolves configuration from
//! the optional TOML file, environment, and flags, then runs either the
//! supervisor (default) or a single worker.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dance_monkey::config::{AppConfig, DEFAULT_LOG_FILTER, ENV_BIND, ENV_WORKERS};
use dance_monkey::http::start_worker;
use dance_monkey::supervisor::{self, WorkerLauncher};
use dance_monkey::Error;

/// dance-monkey: status API behind a multi-process supervisor
#[derive(Parser, Debug)]
#[command(name = "dance-monkey", version, about)]
struct Args {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level filter (e.g., "dance_monkey=debug")
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Address to bind, host:port
    #[arg(short, long, global = true, env = ENV_BIND)]
    bind: Option<String>,

    /// Number of worker processes (default: 2 x CPU count + 1)
    #[arg(short, long, global = true, env = ENV_WORKERS)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the supervisor and its workers (default)
    Serve,

    /// Run a single worker; started by the supervisor
    #[command(hide = true)]
    Worker {
        /// Worker slot number, for logging
        #[arg(long)]
        id: usize,
    },
}

fn init_tracing(log_level: Option<&str>, json: bool) {
    // Priority: CLI > env > default
    let log_filter = log_level
        .map(str::to_owned)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    let registry =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(&log_filter));

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run(args: Args) -> Result<(), Error> {
    let mut config = AppConfig::load(args.config.as_deref())?;
    config.apply_overrides(args.bind, args.workers);

    init_tracing(args.log_level.as_deref(), config.logging.is_json());
    config.validate()?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            tracing::info!(
                config = ?args.config,
                bind = %config.server.bind,
                workers = config.server.worker_count(),
                timeout_secs = config.server.timeout_seconds,
                "Loaded configuration"
            );

            let launcher = WorkerLauncher::current_exe(
                args.config.as_deref(),
                args.log_level.as_deref(),
                &config.server.bind,
            )?;
            supervisor::serve(&config, launcher).await?;
        }
        Command::Worker { id } => {
            start_worker(&config, id).await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "Exiting");
        eprintln!("dance-monkey: {}", e);
        std::process::exit(e.exit_code());
    }
}
