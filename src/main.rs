//! Burrow CLI - reverse tunnel client tooling
//!
//! Validates proxy configuration files and dry-runs them through the proxy
//! manager without contacting a server.

use anyhow::{Context, Result};
use burrow_client::{MessageSink, ProxyManager, ProxyStatus};
use burrow_proto::{ClientConfig, ControlMessage};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Burrow - expose local services through a reverse tunnel server
#[derive(Parser, Debug)]
#[command(name = "burrow")]
#[command(version)]
#[command(long_version = concat!(env!("CARGO_PKG_VERSION"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse and validate a configuration file
    Verify {
        /// Path to the YAML configuration
        #[arg(short, long, env = "BURROW_CONFIG")]
        config: PathBuf,
    },
    /// Load a configuration into a proxy manager and show the result
    Status {
        /// Path to the YAML configuration
        #[arg(short, long, env = "BURROW_CONFIG")]
        config: PathBuf,

        /// UDP port announced by the server
        #[arg(long, default_value = "0")]
        server_udp_port: u16,

        /// Print statuses as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Setup logging; RUST_LOG takes precedence over --verbose
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

fn load(path: &Path) -> Result<ClientConfig> {
    ClientConfig::load(path).with_context(|| format!("Invalid configuration {:?}", path))
}

fn verify(path: PathBuf) -> Result<()> {
    let config = load(&path)?;

    println!(
        "{:?} is valid: server {}:{}, {} proxies",
        path,
        config.common.server_addr,
        config.common.server_port,
        config.proxies.len()
    );
    for proxy in &config.proxies {
        println!(
            "  {:<20} {:<6} {}",
            proxy.name,
            proxy.kind.as_str(),
            proxy.local_addr()
        );
    }
    Ok(())
}

async fn status(path: PathBuf, server_udp_port: u16, json: bool) -> Result<()> {
    let config = load(&path)?;
    let desired = config.proxy_map();

    let (sink, mut rx) = MessageSink::channel(config.common.message_queue_capacity);
    let manager = ProxyManager::new(sink, Arc::new(config.common), server_udp_port);

    let summary = manager.reload(desired)?;
    info!(added = summary.added.len(), "Configuration loaded");

    while let Ok(msg) = rx.try_recv() {
        if let ControlMessage::NewProxy(m) = msg {
            info!(proxy_name = %m.proxy_name, proxy_type = %m.proxy_type, "Would register proxy");
        }
    }

    let mut statuses = manager.status();
    statuses.sort_by(|a, b| a.name.cmp(&b.name));
    print_statuses(&statuses, json)?;

    manager.close();
    Ok(())
}

fn print_statuses(statuses: &[ProxyStatus], json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(statuses).context("Failed to serialize statuses")?
        );
        return Ok(());
    }

    println!("{:<20} {:<6} {:<10} {:<22} REMOTE/ERROR", "NAME", "TYPE", "PHASE", "LOCAL");
    for s in statuses {
        println!(
            "{:<20} {:<6} {:<10} {:<22} {}",
            s.name,
            s.proxy_type,
            s.phase.as_str(),
            s.local_addr,
            s.remote_addr_or_error().unwrap_or("-")
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Verify { config } => verify(config),
        Commands::Status {
            config,
            server_udp_port,
            json,
        } => status(config, server_udp_port, json).await,
    }
}
