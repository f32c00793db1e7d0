use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_describes_the_orchestrator() {
    Command::cargo_bin("dwigear")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Run orchestrator"));
}

#[test]
fn missing_config_still_exits_zero() {
    // the platform contract: a broken run never crashes the process
    Command::cargo_bin("dwigear")
        .unwrap()
        .args(["--config", "/no/such/config.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("run aborted before any work"));
}

#[test]
fn config_without_credentials_is_reported_not_thrown() {
    let tmp = tempfile::TempDir::new().unwrap();
    let config = tmp.path().join("config.json");
    std::fs::write(&config, r#"{"destination": {"id": "run-42"}}"#).unwrap();

    Command::cargo_bin("dwigear")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("api key credential"));
}
