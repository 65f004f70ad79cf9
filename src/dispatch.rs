//! The `ag` command dispatcher.
//!
//! Maps one CLI flag to one of four actions. Chat and status are delegated
//! to a [`ChatFrontend`]; start, stop and the liveness query go to a
//! [`ServiceManager`]. Service state is never cached: it is queried once
//! before chat and, only if a start was attempted, once more after the
//! grace period.

use crate::error::{DispatchError, ServiceError};
use async_trait::async_trait;
use std::io::Write;
use std::time::Duration;
use tracing::{info, warn};

/// Fixed usage text printed by `ag -h`.
pub const HELP_TEXT: &str = "\
Usage: ag [OPTION]

Options:
  (none)         chat with the model (starts the service if needed)
  -s, --status   show service status
  -k, --stop     stop the service
  -h, --help     show this help
";

/// What a single `ag` invocation does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Chat,
    Status,
    Stop,
    Help,
}

impl Action {
    /// Pick the action from the process arguments (program name excluded).
    ///
    /// Only the first token counts. Anything unrecognized means chat.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match args.into_iter().next() {
            Some(flag) => Self::from_flag(flag.as_ref()),
            None => Action::Chat,
        }
    }

    pub fn from_flag(flag: &str) -> Self {
        match flag {
            "-s" | "--status" => Action::Status,
            "-k" | "--stop" => Action::Stop,
            "-h" | "--help" => Action::Help,
            _ => Action::Chat,
        }
    }

    /// Help is answered without reading any configuration.
    pub fn needs_config(self) -> bool {
        self != Action::Help
    }
}

/// The OS service manager, as seen by the dispatcher.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Name of the managed unit, for messages.
    fn unit(&self) -> &str;

    async fn is_active(&self) -> Result<bool, ServiceError>;

    async fn start(&self) -> Result<(), ServiceError>;

    async fn stop(&self) -> Result<(), ServiceError>;
}

/// The chat client, as seen by the dispatcher.
#[async_trait]
pub trait ChatFrontend: Send + Sync {
    /// Print the service's status report.
    async fn show_status(&self) -> anyhow::Result<()>;

    /// Run an interactive chat until the operator leaves.
    async fn run_interactive(&self) -> anyhow::Result<()>;
}

/// Routes an [`Action`] to its collaborator.
pub struct Dispatcher<S, F> {
    service: S,
    frontend: F,
    grace_period: Duration,
}

impl<S: ServiceManager, F: ChatFrontend> Dispatcher<S, F> {
    pub fn new(service: S, frontend: F, grace_period: Duration) -> Self {
        Self {
            service,
            frontend,
            grace_period,
        }
    }

    /// Perform `action`, writing dispatcher messages to `out`.
    ///
    /// Status and stop failures are reported on `err` and do not fail the
    /// invocation. Only a failed startup, or the chat itself, returns an error.
    pub async fn dispatch<W: Write, E: Write>(
        &self,
        action: Action,
        out: &mut W,
        err: &mut E,
    ) -> Result<(), DispatchError> {
        match action {
            Action::Help => {
                out.write_all(HELP_TEXT.as_bytes())?;
                out.flush()?;
            }
            Action::Status => {
                if let Err(e) = self.frontend.show_status().await {
                    writeln!(err, "Error: {:#}", e)?;
                }
            }
            Action::Stop => {
                if let Err(e) = self.service.stop().await {
                    warn!("Stop command failed: {}", e);
                    writeln!(err, "Error: {}", e)?;
                }
                writeln!(out, "Service {} stopped", self.service.unit())?;
            }
            Action::Chat => {
                self.ensure_running(out).await?;
                self.frontend.run_interactive().await?;
            }
        }
        Ok(())
    }

    /// Start the service if it is down: one start, one wait, one re-check.
    async fn ensure_running<W: Write>(&self, out: &mut W) -> Result<(), DispatchError> {
        if self.service.is_active().await? {
            return Ok(());
        }

        let unit = self.service.unit().to_string();
        writeln!(out, "Service {} is not running, starting it...", unit)?;
        out.flush()?;

        // A failed start still gets the grace wait and the re-check.
        if let Err(e) = self.service.start().await {
            warn!("Start command failed: {}", e);
        }

        tokio::time::sleep(self.grace_period).await;

        if self.service.is_active().await? {
            info!("Service {} is active", unit);
            Ok(())
        } else {
            Err(DispatchError::StartupFailed { unit })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    struct FakeService {
        answers: Mutex<VecDeque<bool>>,
        start_fails: bool,
        stop_fails: bool,
        log: Log,
    }

    #[async_trait]
    impl ServiceManager for FakeService {
        fn unit(&self) -> &str {
            "qwen-server"
        }

        async fn is_active(&self) -> Result<bool, ServiceError> {
            self.log.lock().unwrap().push("is_active");
            let answer = self
                .answers
                .lock()
                .unwrap()
                .pop_front()
                .expect("is_active called more often than scripted");
            Ok(answer)
        }

        async fn start(&self) -> Result<(), ServiceError> {
            self.log.lock().unwrap().push("start");
            if self.start_fails {
                return Err(ServiceError::Failed {
                    command: "sudo systemctl start qwen-server".into(),
                    status: "exit status: 1".into(),
                    stderr: "denied".into(),
                });
            }
            Ok(())
        }

        async fn stop(&self) -> Result<(), ServiceError> {
            self.log.lock().unwrap().push("stop");
            if self.stop_fails {
                return Err(ServiceError::Failed {
                    command: "sudo systemctl stop qwen-server".into(),
                    status: "exit status: 5".into(),
                    stderr: "Unit qwen-server.service not loaded.".into(),
                });
            }
            Ok(())
        }
    }

    struct FakeFrontend {
        status_fails: bool,
        log: Log,
    }

    #[async_trait]
    impl ChatFrontend for FakeFrontend {
        async fn show_status(&self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push("show_status");
            if self.status_fails {
                anyhow::bail!("Could not reach the service");
            }
            Ok(())
        }

        async fn run_interactive(&self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push("run_interactive");
            Ok(())
        }
    }

    fn dispatcher(
        answers: &[bool],
        start_fails: bool,
        grace: Duration,
    ) -> (Dispatcher<FakeService, FakeFrontend>, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let service = FakeService {
            answers: Mutex::new(answers.iter().copied().collect()),
            start_fails,
            stop_fails: false,
            log: Arc::clone(&log),
        };
        let frontend = FakeFrontend {
            status_fails: false,
            log: Arc::clone(&log),
        };
        (Dispatcher::new(service, frontend, grace), log)
    }

    fn calls(log: &Log) -> Vec<&'static str> {
        log.lock().unwrap().clone()
    }

    #[test]
    fn test_flag_parsing() {
        assert_eq!(Action::from_args(["-s"]), Action::Status);
        assert_eq!(Action::from_args(["--status"]), Action::Status);
        assert_eq!(Action::from_args(["-k"]), Action::Stop);
        assert_eq!(Action::from_args(["--stop"]), Action::Stop);
        assert_eq!(Action::from_args(["-h"]), Action::Help);
        assert_eq!(Action::from_args(["--help"]), Action::Help);
        assert_eq!(Action::from_args(Vec::<String>::new()), Action::Chat);
    }

    #[test]
    fn test_unrecognized_flag_means_chat() {
        assert_eq!(Action::from_args(["-x"]), Action::Chat);
        assert_eq!(Action::from_args(["hello"]), Action::Chat);
        // Only the first token is inspected.
        assert_eq!(Action::from_args(["-x", "-s"]), Action::Chat);
    }

    #[test]
    fn test_help_needs_no_config() {
        assert!(!Action::Help.needs_config());
        assert!(Action::Chat.needs_config());
    }

    #[tokio::test]
    async fn test_help_prints_fixed_text_only() {
        let (d, log) = dispatcher(&[], false, Duration::ZERO);
        let mut out = Vec::new();
        d.dispatch(Action::Help, &mut out, &mut io::sink()).await.unwrap();
        assert_eq!(out, HELP_TEXT.as_bytes());
        assert!(calls(&log).is_empty());
    }

    #[tokio::test]
    async fn test_status_only_queries_client() {
        let (d, log) = dispatcher(&[], false, Duration::ZERO);
        let mut out = Vec::new();
        d.dispatch(Action::Status, &mut out, &mut io::sink()).await.unwrap();
        assert_eq!(calls(&log), vec!["show_status"]);
    }

    #[tokio::test]
    async fn test_unreachable_status_is_reported_not_failed() {
        let (mut d, log) = dispatcher(&[], false, Duration::ZERO);
        d.frontend.status_fails = true;
        let mut out = Vec::new();
        let mut err = Vec::new();
        d.dispatch(Action::Status, &mut out, &mut err).await.unwrap();
        assert_eq!(calls(&log), vec!["show_status"]);
        assert!(out.is_empty());
        assert_eq!(String::from_utf8(err).unwrap(), "Error: Could not reach the service\n");
    }

    #[tokio::test]
    async fn test_failed_stop_still_confirms() {
        let (mut d, log) = dispatcher(&[], false, Duration::ZERO);
        d.service.stop_fails = true;
        let mut out = Vec::new();
        let mut err = Vec::new();
        d.dispatch(Action::Stop, &mut out, &mut err).await.unwrap();
        assert_eq!(calls(&log), vec!["stop"]);
        assert_eq!(String::from_utf8(out).unwrap(), "Service qwen-server stopped\n");
        assert!(String::from_utf8(err).unwrap().contains("not loaded"));
    }

    #[tokio::test]
    async fn test_stop_confirms() {
        let (d, log) = dispatcher(&[], false, Duration::ZERO);
        let mut out = Vec::new();
        d.dispatch(Action::Stop, &mut out, &mut io::sink()).await.unwrap();
        assert_eq!(calls(&log), vec!["stop"]);
        assert_eq!(String::from_utf8(out).unwrap(), "Service qwen-server stopped\n");
    }

    #[tokio::test]
    async fn test_active_service_chats_without_start() {
        let (d, log) = dispatcher(&[true], false, Duration::ZERO);
        let mut out = Vec::new();
        d.dispatch(Action::Chat, &mut out, &mut io::sink()).await.unwrap();
        assert_eq!(calls(&log), vec!["is_active", "run_interactive"]);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_inactive_service_started_once_then_chat() {
        let grace = Duration::from_millis(20);
        let (d, log) = dispatcher(&[false, true], false, grace);
        let mut out = Vec::new();
        let started = Instant::now();
        d.dispatch(Action::Chat, &mut out, &mut io::sink()).await.unwrap();
        assert!(started.elapsed() >= grace);
        assert_eq!(
            calls(&log),
            vec!["is_active", "start", "is_active", "run_interactive"]
        );
        assert!(String::from_utf8(out).unwrap().contains("starting it"));
    }

    #[tokio::test]
    async fn test_service_still_down_aborts_without_retry() {
        let (d, log) = dispatcher(&[false, false], false, Duration::ZERO);
        let mut out = Vec::new();
        let err = d.dispatch(Action::Chat, &mut out, &mut io::sink()).await.unwrap_err();
        assert!(matches!(err, DispatchError::StartupFailed { ref unit } if unit == "qwen-server"));
        assert_eq!(calls(&log), vec!["is_active", "start", "is_active"]);
    }

    #[tokio::test]
    async fn test_failed_start_command_still_rechecks() {
        let (d, log) = dispatcher(&[false, true], true, Duration::ZERO);
        let mut out = Vec::new();
        d.dispatch(Action::Chat, &mut out, &mut io::sink()).await.unwrap();
        assert_eq!(
            calls(&log),
            vec!["is_active", "start", "is_active", "run_interactive"]
        );
    }
}
