//! systemd adapter for the dispatcher's service manager capability.

use crate::config::ServiceConfig;
use crate::dispatch::ServiceManager;
use crate::error::ServiceError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Drives a unit through `systemctl`.
pub struct Systemctl {
    unit: String,
    sudo: bool,
}

impl Systemctl {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            unit: config.unit.clone(),
            sudo: config.sudo && !is_root(),
        }
    }

    /// Build the argv for a state-changing verb.
    fn control_argv(&self, verb: &str) -> Vec<String> {
        let mut argv = Vec::with_capacity(4);
        if self.sudo {
            argv.push("sudo".to_string());
        }
        argv.push("systemctl".to_string());
        argv.push(verb.to_string());
        argv.push(self.unit.clone());
        argv
    }

    async fn control(&self, verb: &str) -> Result<(), ServiceError> {
        let argv = self.control_argv(verb);
        let command = argv.join(" ");
        debug!("Running {}", command);

        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::inherit())
            .output()
            .await
            .map_err(|source| ServiceError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ServiceError::Failed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceManager for Systemctl {
    fn unit(&self) -> &str {
        &self.unit
    }

    async fn is_active(&self) -> Result<bool, ServiceError> {
        let command = format!("systemctl is-active --quiet {}", self.unit);
        let status = Command::new("systemctl")
            .args(["is-active", "--quiet", &self.unit])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|source| ServiceError::Spawn { command, source })?;
        debug!("{} is-active: {}", self.unit, status);
        Ok(status.success())
    }

    async fn start(&self) -> Result<(), ServiceError> {
        self.control("start").await
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.control("stop").await
    }
}

fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}
