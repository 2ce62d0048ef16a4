//! CLI tests for `tfci`.
//!
//! Spawns the binary and checks exit codes and config rendering. Nothing here
//! reaches a real repository or tool.

use std::fs;
use std::process::Command;

use worker::exit_codes;

fn tfci() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tfci"));
    for key in [
        "GH_ACCESS_TOKEN",
        "GH_ORG",
        "GH_REPO",
        "GH_API_URL",
        "TF_ARGS",
        "TF_CHECKOUT_DIR",
        "TF_STEP_TIMEOUT_SECS",
        "SLACK_WEBHOOK_URL",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

#[test]
fn config_masks_access_token() {
    let output = tfci()
        .arg("config")
        .env("GH_ACCESS_TOKEN", "ghp_secret")
        .env("GH_ORG", "acme")
        .env("TF_ARGS", "-var 'region=eu west'")
        .output()
        .expect("tfci config");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("ghp_secret"), "{stdout}");
    assert!(stdout.contains("***"), "{stdout}");
    assert!(stdout.contains("region=eu west"), "{stdout}");
}

#[test]
fn config_file_is_read() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("tfci.toml");
    fs::write(&path, "workspace = \"staging\"\nworkers = 2\n").expect("write config");

    let output = tfci()
        .arg("config")
        .arg("--config")
        .arg(&path)
        .output()
        .expect("tfci config");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("workspace = \"staging\""), "{stdout}");
    assert!(stdout.contains("workers = 2"), "{stdout}");
}

#[test]
fn invalid_timeout_env_is_invalid() {
    let status = tfci()
        .arg("config")
        .env("TF_STEP_TIMEOUT_SECS", "soon")
        .status()
        .expect("tfci config");
    assert_eq!(status.code(), Some(exit_codes::INVALID));
}

#[test]
fn malformed_batch_input_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("triggers.jsonl");
    fs::write(&path, "{\"action\":\"destroy\",\"branch\":\"master\"}\n").expect("write input");

    let output = tfci().arg("batch").arg(&path).output().expect("tfci batch");
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("line 1"));
}
