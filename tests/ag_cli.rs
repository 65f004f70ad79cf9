//! Black-box tests of the `ag` binary for paths that never touch systemd.

use assert_cmd::Command;
use predicates::prelude::*;
use qwen_fast::dispatch::HELP_TEXT;

#[test]
fn short_and_long_help_print_the_same_fixed_text() {
    for flag in ["-h", "--help"] {
        Command::cargo_bin("ag")
            .unwrap()
            .arg(flag)
            .env("QWEN_FAST_CONFIG", "/nonexistent/config.toml")
            .assert()
            .success()
            .stdout(HELP_TEXT);
    }
}

#[test]
fn status_reports_unreachable_service_and_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    let socket = dir.path().join("absent.sock");
    std::fs::write(
        &config_path,
        format!(
            "[server]\nsocket_path = \"{}\"\n\n[client]\nconnect_timeout_secs = 1\n",
            socket.display()
        ),
    )
    .unwrap();

    Command::cargo_bin("ag")
        .unwrap()
        .arg("--status")
        .env("QWEN_FAST_CONFIG", &config_path)
        .assert()
        .success()
        .stdout("")
        .stderr(predicate::str::contains("Could not reach the service"));
}
