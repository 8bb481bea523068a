//! Integration tests for argument parsing and configuration errors.

#![allow(clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;

/// `envbox` with every `CODER_*` setting cleared.
fn envbox() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("envbox"));
    cmd.env("NO_COLOR", "1");
    for (key, _) in std::env::vars_os() {
        if key.to_string_lossy().starts_with("CODER_") {
            cmd.env_remove(key);
        }
    }
    cmd
}

#[test]
fn test_cli_no_args_shows_help() {
    envbox().assert().code(2).stderr(predicate::str::contains(
        "Nested workspace container supervisor",
    ));
}

#[test]
fn test_cli_help_lists_subcommands() {
    envbox()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("docker"))
        .stdout(predicate::str::contains("teardown"))
        .stdout(predicate::str::contains("libs"));
}

#[test]
fn test_version_command_shows_version() {
    envbox()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "envbox {}",
            env!("CARGO_PKG_VERSION")
        )));
}

#[test]
fn test_version_json() {
    let output = envbox()
        .args(["version", "--json"])
        .output()
        .expect("run");
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(value["version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn test_unknown_command_fails() {
    envbox().arg("launch").assert().failure();
}

#[test]
fn test_docker_requires_inner_image() {
    envbox()
        .arg("docker")
        .env("CODER_INNER_USERNAME", "coder")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("CODER_INNER_IMAGE must be set"));
}

#[test]
fn test_docker_requires_inner_username() {
    envbox()
        .arg("docker")
        .env("CODER_INNER_IMAGE", "ubuntu:22.04")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("CODER_INNER_USERNAME must be set"));
}

#[test]
fn test_docker_rejects_relative_guest_lib_dir() {
    envbox()
        .arg("docker")
        .env("CODER_INNER_IMAGE", "ubuntu:22.04")
        .env("CODER_INNER_USERNAME", "coder")
        .env("CODER_INNER_USR_LIB_DIR", "usr/lib")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("must be absolute"));
}

#[test]
fn test_docker_rejects_unknown_mount_mode() {
    envbox()
        .arg("docker")
        .env("CODER_INNER_IMAGE", "ubuntu:22.04")
        .env("CODER_INNER_USERNAME", "coder")
        .env("CODER_USR_LIB_MOUNT", "overlay")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("CODER_USR_LIB_MOUNT"));
}

#[test]
fn test_docker_rejects_malformed_bool() {
    envbox()
        .arg("docker")
        .env("CODER_INNER_IMAGE", "ubuntu:22.04")
        .env("CODER_INNER_USERNAME", "coder")
        .env("CODER_ADD_GPU", "yes please")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("cannot read CODER_* settings"));
}
