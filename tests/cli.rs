use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn botup(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("botup").unwrap();
    cmd.env_remove("BOTUP_CONFIG")
        .env_remove("RUST_LOG")
        .env("BOTUP_NO_PROGRESS", "1")
        .arg("--root")
        .arg(root)
        .arg("--no-progress");
    cmd
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("botup")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("upgrade"))
        .stdout(predicate::str::contains("check"));
}

#[test]
fn test_check_without_endpoints_fails() {
    let temp = TempDir::new().unwrap();
    botup(temp.path())
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("check_endpoint"));
}

#[test]
fn test_leading_flag_targets_system() {
    let temp = TempDir::new().unwrap();
    botup(temp.path())
        .args(["upgrade", "force"])
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not configured"));
}

#[test]
fn test_unknown_plugin_is_reported() {
    let temp = TempDir::new().unwrap();
    botup(temp.path())
        .args(["upgrade", "bridge"])
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Plugin 'bridge' is not installed"));
}

#[test]
fn test_pending_reboot_blocks_upgrades() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(".reboot-required"), b"").unwrap();
    botup(temp.path())
        .arg("upgrade")
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("reboot is pending"));
}

#[test]
fn test_settings_file_is_honored() {
    let temp = TempDir::new().unwrap();
    let settings = temp.path().join("custom.toml");
    std::fs::write(&settings, "check_endpoint = \"\"\nconfirm_timeout_secs = 5\n").unwrap();
    botup(temp.path())
        .arg("--config")
        .arg(&settings)
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("check_endpoint"));
}
