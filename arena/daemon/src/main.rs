//! Arena Daemon - Multi-Model Streaming Server
//!
//! Entry point for the model arena. Serves the HTTP/SSE API that fans one
//! prompt out to several models and streams their answers back side by side.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (127.0.0.1:8001, Ollama at localhost:11434)
//! arena-daemon serve
//!
//! # Custom bind address and config file
//! arena-daemon --config ./arena.toml serve --host 0.0.0.0 --port 9000
//!
//! # Verify Ollama and wait for a running server
//! arena-daemon check --server-url http://127.0.0.1:8001
//!
//! # Verbose logging
//! RUST_LOG=debug arena-daemon serve
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown

mod check;
mod server;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use thiserror::Error;
use tokio::signal;
use tracing::{error, info, warn};

use arena_core::{default_config_path, load_config_from_path, ArenaConfig, ConfigOverrides};

use server::ArenaServer;

/// Arena Daemon - stream one prompt through many models at once
#[derive(Parser, Debug)]
#[command(name = "arena-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "ARENA_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "ARENA_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Run the HTTP server
    Serve {
        /// Bind host
        #[arg(long)]
        host: Option<String>,

        /// Bind port
        #[arg(short = 'p', long)]
        port: Option<u16>,

        /// Ollama address (`host`, `host:port`, or URL)
        #[arg(long, value_name = "ADDR")]
        ollama: Option<String>,

        /// Start even if Ollama is not reachable
        #[arg(long)]
        skip_backend_check: bool,
    },

    /// Verify Ollama, and optionally a running arena server
    Check {
        /// Arena server to wait for, e.g. `http://127.0.0.1:8001`
        #[arg(long, value_name = "URL")]
        server_url: Option<String>,

        /// How long to wait for the server to become healthy
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
}

/// Launcher failures reported to the user
#[derive(Debug, Error)]
pub enum CheckError {
    /// Ollama did not answer
    #[error("Ollama is not reachable at {url}. Start it with `ollama serve`")]
    BackendUnreachable {
        /// Backend base URL
        url: String,
    },

    /// The arena server never reported healthy
    #[error("arena server at {url} did not become healthy within {waited_secs}s")]
    ServerNotReady {
        /// Server base URL
        url: String,
        /// How long we waited
        waited_secs: u64,
    },

    /// HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("arena_daemon={level},arena_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Resolve configuration: file, then environment, then CLI
fn resolve_config(args: &Args) -> Result<ArenaConfig> {
    let path = args.config.clone().or_else(default_config_path);
    if let Some(ref path) = args.config {
        if !path.exists() {
            warn!(path = ?path, "Config file does not exist, using defaults");
        }
    }

    let mut config = load_config_from_path(path.as_deref()).context("Failed to load configuration")?;

    if let Command::Serve {
        ref host,
        port,
        ref ollama,
        ..
    } = args.command
    {
        let mut overrides = ConfigOverrides::new();
        overrides.host.clone_from(host);
        overrides.port = port;
        overrides.backend.clone_from(ollama);
        overrides.apply(&mut config);
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, initiating shutdown"),
        () = terminate => info!("Received SIGTERM, initiating shutdown"),
    }
}

async fn serve(config: ArenaConfig, skip_backend_check: bool) -> Result<()> {
    let server = ArenaServer::new(config);

    if skip_backend_check {
        warn!("Skipping backend check");
    } else {
        server.preflight().await?;
    }

    let listener = server.bind().await?;
    server.run(listener, shutdown_signal()).await
}

async fn run(args: Args) -> Result<()> {
    let config = resolve_config(&args)?;

    match args.command {
        Command::Serve {
            skip_backend_check, ..
        } => serve(config, skip_backend_check).await,
        Command::Check {
            server_url,
            timeout_secs,
        } => {
            check::run(
                &config,
                server_url.as_deref(),
                Duration::from_secs(timeout_secs),
            )
            .await?;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), pid = std::process::id(), "Arena daemon starting");

    match run(args).await {
        Ok(()) => {
            info!("Arena daemon stopped cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Arena daemon stopped with error");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
