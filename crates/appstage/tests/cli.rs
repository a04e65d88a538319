//! Binary-level tests that need no running daemon

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn appstage(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("appstage").unwrap();
    cmd.env("APPSTAGE_HOME", home.path())
        .env_remove("APPSTAGE_CONFIG")
        .env("NO_COLOR", "1");
    cmd
}

#[test]
fn help_lists_command_groups() {
    let home = TempDir::new().unwrap();
    appstage(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("version"))
        .stdout(predicate::str::contains("sync"));
}

#[test]
fn create_requires_path_and_source() {
    let home = TempDir::new().unwrap();
    appstage(&home)
        .args(["app", "create", "/blog"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("<SOURCE>"));
}

#[test]
fn invalid_reload_option_is_rejected() {
    let home = TempDir::new().unwrap();
    appstage(&home)
        .args(["apply", "./defs", "--reload", "always"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid reload option"));
}

#[test]
fn invalid_version_target_is_rejected() {
    let home = TempDir::new().unwrap();
    appstage(&home)
        .args(["version", "switch", "/blog", "latest"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("latest"));
}

#[test]
fn daemon_status_when_not_running() {
    let home = TempDir::new().unwrap();
    appstage(&home)
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Daemon is not running"));
}

#[test]
fn daemon_status_json() {
    let home = TempDir::new().unwrap();
    appstage(&home)
        .args(["--json", "daemon", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""running": false"#));
}

#[test]
fn daemon_stop_when_not_running() {
    let home = TempDir::new().unwrap();
    appstage(&home)
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not running"));
}

#[test]
fn settings_update_needs_a_change() {
    let home = TempDir::new().unwrap();
    appstage(&home)
        .args(["settings", "update", "/blog"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No settings to update"));
}
