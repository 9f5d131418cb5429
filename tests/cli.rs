//! Command-line behaviour of the `aemtrace` binary.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::tempdir;

fn run_cli(out: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_aemtrace"))
        .arg("--out")
        .arg(out)
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .unwrap()
}

#[test]
fn test_rejected_flags_leave_no_files() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("outputs");

    let output = run_cli(&out, &["polarization", "--samples", "0"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("samples"));
    assert!(!out.exists());

    let output = run_cli(&out, &["edge", "--window", "0"]);
    assert!(!output.status.success());
    assert!(!out.exists());
}

#[test]
fn test_rejected_config_file_leaves_no_files() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("outputs");
    let config = dir.path().join("config.json");
    std::fs::write(&config, r#"{"thermal": {"thermal_resistance": -1.0}}"#).unwrap();

    let config = config.to_str().unwrap();
    for command in ["thermal", "validate"] {
        let output = run_cli(&out, &["--config", config, command]);
        assert!(!output.status.success(), "{command} succeeded");
        assert!(!out.exists(), "{command} touched the output root");
    }
}

#[test]
fn test_valid_command_writes_and_verifies() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("outputs");

    let output = run_cli(&out, &["production", "--days", "5", "--seed", "7"]);
    assert!(
        output.status.success(),
        "production failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(out.join("validation_data").join("file_verification.csv").exists());

    let output = run_cli(&out, &["verify"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("VALID"));
}
