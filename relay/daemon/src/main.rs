//! Relay Daemon - OpenAI-compatible front end for the inference relay
//!
//! Accepts chat completion and embedding requests over HTTP and races each
//! one across the configured host pool.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (0.0.0.0:3000, config/hosts.json, config/api-keys.json)
//! relay-daemon
//!
//! # Custom listen address
//! relay-daemon --listen 127.0.0.1:8080
//!
//! # With config file
//! relay-daemon --config /etc/inference-relay/relay.toml
//!
//! # Verbose logging
//! RUST_LOG=debug relay-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown

mod server;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use relay_core::config::{default_config_path, load_config_from_path, ConfigOverrides};

use server::DaemonServer;

/// Relay Daemon - races inference requests across interchangeable hosts
#[derive(Parser, Debug)]
#[command(name = "relay-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to listen on
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "RELAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Hosts file (`{"hosts": [...]}`)
    #[arg(long, value_name = "FILE")]
    hosts_file: Option<PathBuf>,

    /// API key file (`{"apiKeys": [...]}`)
    #[arg(long, value_name = "FILE")]
    keys_file: Option<PathBuf>,

    /// Never reroute to the fallback provider, even if the config enables it
    #[arg(long)]
    no_fallback: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref addr) = self.listen {
            overrides = overrides.with_listen_addr(addr.clone());
        }
        if let Some(ref path) = self.hosts_file {
            overrides = overrides.with_hosts_file(path.clone());
        }
        if let Some(ref path) = self.keys_file {
            overrides = overrides.with_keys_file(path.clone());
        }
        if self.no_fallback {
            overrides = overrides.with_fallback_enabled(false);
        }
        overrides
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("relay_daemon={level},relay_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Resolves on SIGTERM or SIGINT
async fn shutdown_signal() {
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "Failed to install signal handlers, falling back to ctrl-c");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for ctrl-c");
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
        _ = sigint.recv() => info!("Received SIGINT, initiating shutdown"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level);

    info!("Relay Daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("PID: {}", std::process::id());

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(config_path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(source = %config.source(), "Configuration loaded");
    info!(hosts_file = ?config.hosts.file, keys_file = ?config.keys_file, "Pool files");
    info!(
        hosts_per_round = config.race.hosts_per_round,
        deadline_secs = config.race.deadline.as_secs(),
        fallback_enabled = config.fallback.enabled,
        "Race settings"
    );

    let server = DaemonServer::new(&config)?;
    let result = server.run(shutdown_signal()).await;

    match result {
        Ok(()) => {
            info!("Relay daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e)
        }
    }
}
