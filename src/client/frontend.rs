//! The dispatcher's chat collaborator, backed by the socket client.

use super::repl::run_line_chat;
use super::socket::Client;
use super::tui::run_chat_tui;
use crate::config::Config;
use crate::dispatch::ChatFrontend;
use crate::protocol::ServiceStatus;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::{self, Write};
use tokio::io::BufReader;
use tracing::debug;

pub struct SocketFrontend {
    client: Client,
    stream: bool,
}

impl SocketFrontend {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::from_config(config),
            stream: config.client.stream,
        }
    }
}

#[async_trait]
impl ChatFrontend for SocketFrontend {
    async fn show_status(&self) -> Result<()> {
        let status = self
            .client
            .status()
            .await
            .context("Could not reach the service")?;
        write_status(&mut io::stdout().lock(), &status)?;
        Ok(())
    }

    async fn run_interactive(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .context("The service is active but not answering yet")?;

        if atty::is(atty::Stream::Stdin) && atty::is(atty::Stream::Stdout) {
            run_chat_tui(&self.client, self.stream).await
        } else {
            debug!("Not a terminal, using line mode");
            let stdin = BufReader::new(tokio::io::stdin());
            run_line_chat(&self.client, self.stream, stdin, &mut io::stdout()).await
        }
    }
}

/// Print a status report as an aligned key/value table.
pub fn write_status<W: Write>(out: &mut W, status: &ServiceStatus) -> io::Result<()> {
    let rule = "-".repeat(40);
    writeln!(out, "Service status:")?;
    writeln!(out, "{}", rule)?;
    for (key, value) in status.rows() {
        writeln!(out, "{:20}: {}", key, value)?;
    }
    writeln!(out, "{}", rule)?;
    Ok(())
}
