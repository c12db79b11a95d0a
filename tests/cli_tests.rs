//! Command line behaviour of the `codship` binary.

use assert_cmd::Command;
use predicates::prelude::*;

const MANIFEST: &str = r#"
[toolchain]
home = "jde"
version = "5.0.0"

[[project]]
name = "core"
type = "library"
"#;

fn codship() -> Command {
    Command::cargo_bin("codship").unwrap()
}

#[test]
fn help_lists_subcommands() {
    codship()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("package"))
        .stdout(predicate::str::contains("deploy"));
}

#[test]
fn unknown_project_is_rejected_with_known_names() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("codship.toml"), MANIFEST).unwrap();

    codship()
        .current_dir(dir.path())
        .args(["package", "nope"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Unknown project `nope`"))
        .stderr(predicate::str::contains("core"));
}

#[test]
fn malformed_manifest_reports_toml_error() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = dir.path().join("broken.toml");
    std::fs::write(&manifest, "[toolchain\nhome = ").unwrap();

    codship()
        .args(["--manifest", manifest.to_str().unwrap(), "package"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("TOML error"))
        .stderr(predicate::str::contains("hint:"));
}

#[test]
fn missing_compiler_fails_the_project() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("codship.toml"), MANIFEST).unwrap();

    codship()
        .current_dir(dir.path())
        .args(["--state-file", "state.json", "package"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("core: failed"));
}

#[test]
fn device_pin_conflicts_with_simulator_target() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("codship.toml"), MANIFEST).unwrap();

    codship()
        .current_dir(dir.path())
        .args(["deploy", "--target", "simulator", "--device", "0x1"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid arguments"));
}
