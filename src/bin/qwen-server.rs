//! qwen-server - the resident service behind `ag`.
//!
//! Normally started by systemd; run it by hand to see startup errors.

use anyhow::{Context, Result};
use clap::Parser;
use qwen_fast::config::{Config, Transport};
use qwen_fast::daemon::DaemonServer;
use qwen_fast::logging;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "qwen-server")]
#[command(author, version, about = "Resident Qwen chat service")]
struct Cli {
    /// Read configuration from this file instead of the default locations
    #[arg(short = 'c', long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Listen on this Unix socket (overrides config)
    #[arg(long, value_name = "PATH", conflicts_with = "tcp")]
    socket: Option<PathBuf>,

    /// Listen on a loopback TCP address instead of a Unix socket
    #[arg(long, value_name = "ADDR")]
    tcp: Option<String>,

    /// Skip the warm-up request at startup
    #[arg(long)]
    no_warmup: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init("qwen_fast=info,qwen_server=info,reqwest=warn");

    if std::env::var_os("INVOCATION_ID").is_some() {
        info!("Running under systemd");
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().context("Failed to load configuration")?,
    };
    apply_overrides(&mut config, &cli);

    info!(
        "Using backend: {} (model: {})",
        config.backend_type(),
        config.model_name()
    );

    let server = DaemonServer::new(config)?;
    server.run().await
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(socket) = &cli.socket {
        config.server.transport = Transport::Unix;
        config.server.socket_path = socket.clone();
    }
    if let Some(addr) = &cli.tcp {
        config.server.transport = Transport::Tcp;
        config.server.tcp_addr = addr.clone();
    }
    if cli.no_warmup {
        config.server.warmup = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_tcp_override() {
        let cli = Cli::parse_from(["qwen-server", "--tcp", "127.0.0.1:7000", "--no-warmup"]);
        let mut config = Config::default();
        apply_overrides(&mut config, &cli);
        assert_eq!(config.server.transport, Transport::Tcp);
        assert_eq!(config.server.tcp_addr, "127.0.0.1:7000");
        assert!(!config.server.warmup);
    }

    #[test]
    fn test_socket_and_tcp_conflict() {
        let result = Cli::try_parse_from(["qwen-server", "--socket", "/tmp/x.sock", "--tcp", "127.0.0.1:1"]);
        assert!(result.is_err());
    }
}
