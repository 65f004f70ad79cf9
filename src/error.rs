//! Typed errors for the dispatcher and the service manager adapter.

use thiserror::Error;

/// Failure to drive the OS service manager.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

/// Errors surfaced by `ag`.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The one distinguished failure: the service did not come up.
    #[error("service {unit} failed to start; check its logs with: journalctl -u {unit} -n 50")]
    StartupFailed { unit: String },

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Client(#[from] anyhow::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_failed_points_at_logs() {
        let e = DispatchError::StartupFailed {
            unit: "qwen-server".into(),
        };
        assert!(e.to_string().contains("journalctl -u qwen-server"));
    }

    #[test]
    fn service_failure_display() {
        let e = ServiceError::Failed {
            command: "systemctl stop qwen-server".into(),
            status: "exit status: 1".into(),
            stderr: "Access denied".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("systemctl stop qwen-server"));
        assert!(msg.contains("Access denied"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");
        let e: DispatchError = io_err.into();
        assert!(e.to_string().contains("io error"));
    }
}
