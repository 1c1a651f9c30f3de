//! End-to-end tests for the helper binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::time::Duration;
use tempfile::TempDir;

fn helper() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_hostshim-helper"));
    cmd.timeout(Duration::from_secs(30));
    cmd.env_remove("HOSTSHIM_HELPER_LOG_DIR");
    cmd
}

#[test]
fn read_prints_contents_verbatim() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{\"a\":1}").unwrap();

    helper()
        .arg("read")
        .arg(&path)
        .assert()
        .success()
        .stdout("{\"a\":1}")
        .stderr("");
}

#[test]
fn read_missing_file_fails_on_stderr() {
    let dir = TempDir::new().unwrap();
    helper()
        .arg("read")
        .arg(dir.path().join("nope"))
        .assert()
        .failure()
        .code(1)
        .stdout("")
        .stderr(predicate::str::contains("nope"));
}

#[test]
fn write_then_read_round_trips() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");

    helper()
        .arg("write")
        .arg(&path)
        .arg(r#"{"test":"it's"}"#)
        .assert()
        .success()
        .stdout("true\n");
    helper()
        .arg("read")
        .arg(&path)
        .assert()
        .success()
        .stdout(r#"{"test":"it's"}"#);
}

#[test]
fn write_decodes_base64_and_allows_empty_content() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("status");

    helper()
        .args(["write", "--base64"])
        .arg(&path)
        .arg("aGk=")
        .assert()
        .success()
        .stdout("true\n");
    assert_eq!(std::fs::read(&path).unwrap(), b"hi");

    helper()
        .arg("write")
        .arg(&path)
        .args(["--base64", ""])
        .assert()
        .success();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
}

#[test]
fn watch_reports_existing_entries_and_exits_on_cancel_byte() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("active"), "").unwrap();

    helper()
        .arg("watch")
        .arg(dir.path())
        .write_stdin("\u{3}")
        .assert()
        .success()
        .stdout("add active\n")
        .stderr("");
}

#[test]
fn watch_exits_when_stdin_closes() {
    let dir = TempDir::new().unwrap();
    helper()
        .arg("watch")
        .arg(dir.path())
        .write_stdin("")
        .assert()
        .success()
        .stdout("");
}

#[test]
fn watch_missing_directory_fails() {
    let dir = TempDir::new().unwrap();
    helper()
        .arg("watch")
        .arg(dir.path().join("vpn_status"))
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("vpn_status"));
}
