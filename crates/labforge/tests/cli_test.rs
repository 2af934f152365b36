#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// 設定ファイルも認証情報も無い隔離環境で labforge を起動する
fn labforge(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("labforge").unwrap();
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join(".config"))
        .env("LABFORGE_CREDENTIALS", home.path().join("no-credentials.yaml"))
        .env_remove("LABFORGE_CONFIG")
        .env_remove("TENCENTCLOUD_SECRET_ID")
        .env_remove("TENCENTCLOUD_SECRET_KEY")
        .env_remove("RUST_LOG");
    cmd
}

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    let home = tempfile::tempdir().unwrap();
    labforge(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("provision"))
        .stdout(predicate::str::contains("stage"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("rules"))
        .stdout(predicate::str::contains("--dry-run"));
}

/// バージョン表示が正しく動作することを確認
#[test]
fn test_cli_version() {
    let home = tempfile::tempdir().unwrap();
    labforge(&home)
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("labforge"));
}

/// 不正なコマンドでエラーになることを確認
#[test]
fn test_invalid_command() {
    let home = tempfile::tempdir().unwrap();
    labforge(&home).arg("invalid-command").assert().failure();
}

#[test]
fn test_unknown_stage_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    labforge(&home)
        .args(["--dry-run", "stage", "database"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown stage"));
}

#[test]
fn test_dry_run_provisions_everything() {
    let home = tempfile::tempdir().unwrap();
    labforge(&home)
        .args(["--dry-run", "provision"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dry-run"))
        .stdout(predicate::str::contains("node-network-finalize"))
        .stdout(predicate::str::contains(
            "6 created, 2 adopted, 2 converged, 0 unchanged",
        ));

    // dry-run はカレントディレクトリにチェックポイントを残さない
    assert!(!home.path().join(".labforge").exists());
}

#[test]
fn test_dry_run_stage_without_prerequisite_fails() {
    let home = tempfile::tempdir().unwrap();
    labforge(&home)
        .args(["--dry-run", "stage", "cluster-node"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("has not completed yet"));
}

#[test]
fn test_empty_range_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    labforge(&home)
        .args(["--dry-run", "provision", "--from", "finalize", "--to", "region"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("実行するステージがありません"));
}

#[test]
fn test_status_reads_settings_file() {
    let home = tempfile::tempdir().unwrap();
    std::fs::write(home.path().join("labforge.yaml"), "deployment: lab-x\n").unwrap();

    labforge(&home)
        .args(["--dry-run", "status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"deployment\": \"lab-x\""))
        .stdout(predicate::str::contains("\"fields\""));
}

#[test]
fn test_invalid_settings_file_fails() {
    let home = tempfile::tempdir().unwrap();
    let config = home.path().join("broken.yaml");
    std::fs::write(&config, "name_prefix: Not_Valid\n").unwrap();

    labforge(&home)
        .args(["--dry-run", "--config"])
        .arg(&config)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("name_prefix"));
}

#[test]
fn test_provision_without_credentials_fails() {
    let home = tempfile::tempdir().unwrap();
    labforge(&home)
        .arg("provision")
        .assert()
        .failure()
        .stderr(predicate::str::contains("認証情報"));
}

#[test]
fn test_login_writes_encoded_credentials() {
    let home = tempfile::tempdir().unwrap();
    let path = home.path().join("credentials.yaml");

    labforge(&home)
        .env("LABFORGE_CREDENTIALS", &path)
        .args(["login", "--secret-id", "AKID123", "--secret-key", "top-secret"])
        .assert()
        .success();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("AKID123"));
    assert!(!content.contains("top-secret"));
}
