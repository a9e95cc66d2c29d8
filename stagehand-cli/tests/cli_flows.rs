use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn stagehand_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("stagehand"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG");
    cmd
}

/// A rendered site with two pages, registered via `stagehand init`.
fn init_site(home: &TempDir, site: &TempDir) {
    fs::create_dir_all(site.path().join("css")).expect("css dir");
    fs::write(site.path().join("index.html"), "<h1>home</h1>").expect("index");
    fs::write(site.path().join("css/site.css"), "body{}").expect("css");

    stagehand_cmd(home.path())
        .arg("init")
        .arg(site.path())
        .assert()
        .success()
        .stdout(contains("Publishing from"));
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_millis()
}

#[test]
fn commands_without_config_point_at_init() {
    let home = TempDir::new().expect("home");
    stagehand_cmd(home.path())
        .args(["plan", "publish"])
        .assert()
        .failure()
        .stderr(contains("stagehand init"));
}

#[test]
fn dry_run_reports_plan_and_writes_nothing() {
    let home = TempDir::new().expect("home");
    let site = TempDir::new().expect("site");
    init_site(&home, &site);
    let test_store = home.path().join(".stagehand/test");

    stagehand_cmd(home.path())
        .args(["plan", "publish"])
        .assert()
        .success()
        .stdout(contains("2 to add"))
        .stdout(contains("+ /index.html"))
        .stdout(contains("+ /css/site.css"));

    stagehand_cmd(home.path())
        .args(["sync", "publish", "--dry-run"])
        .assert()
        .success()
        .stdout(contains("[dry-run]"));
    assert!(!test_store.join("index.html").exists());
    assert!(
        !home.path().join(".stagehand/queue").exists(),
        "dry runs publish no status deltas"
    );
}

#[test]
fn publish_then_promote_converges() {
    let home = TempDir::new().expect("home");
    let site = TempDir::new().expect("site");
    init_site(&home, &site);

    stagehand_cmd(home.path())
        .args(["sync", "publish"])
        .assert()
        .success()
        .stdout(contains("2 added, 0 updated, 0 deleted, 0 unchanged"));
    assert_eq!(
        fs::read_to_string(home.path().join(".stagehand/test/index.html")).expect("published"),
        "<h1>home</h1>"
    );

    stagehand_cmd(home.path())
        .args(["sync", "publish"])
        .assert()
        .success()
        .stdout(contains("0 added, 0 updated, 0 deleted, 2 unchanged"));

    fs::remove_file(site.path().join("css/site.css")).expect("remove css");
    stagehand_cmd(home.path())
        .args(["sync", "publish"])
        .assert()
        .success()
        .stdout(contains("1 deleted"));

    stagehand_cmd(home.path())
        .args(["sync", "promote", "--browser-max-age", "60"])
        .assert()
        .success()
        .stdout(contains("1 added"));
    assert!(home.path().join(".stagehand/prod/index.html").exists());
    assert!(!home.path().join(".stagehand/prod/css/site.css").exists());
}

#[test]
fn second_owner_is_refused_the_lock() {
    let home = TempDir::new().expect("home");
    let site = TempDir::new().expect("site");
    init_site(&home, &site);

    stagehand_cmd(home.path())
        .args(["lock", "alice"])
        .assert()
        .success()
        .stdout(contains("unlocked"));

    stagehand_cmd(home.path())
        .args(["lock", "alice"])
        .assert()
        .success();

    stagehand_cmd(home.path())
        .args(["lock", "bob"])
        .assert()
        .failure()
        .stdout(contains("locked by alice at"))
        .stderr(contains("lock is held by another session"));
}

#[test]
fn sent_deltas_reach_the_state_document_after_drain() {
    let home = TempDir::new().expect("home");
    let site = TempDir::new().expect("site");
    init_site(&home, &site);

    stagehand_cmd(home.path())
        .arg("init-state")
        .assert()
        .success()
        .stdout(contains("State document created"));
    stagehand_cmd(home.path())
        .arg("init-state")
        .assert()
        .success()
        .stdout(contains("already exists"));

    stagehand_cmd(home.path())
        .args(["send", r#"{"display":{"building":true}}"#])
        .assert()
        .success()
        .stdout(contains("Queued"));
    let log = format!(
        r#"{{"logs":[{{"time":{},"type":"info","msg":"site rebuilt"}}]}}"#,
        now_ms()
    );
    stagehand_cmd(home.path())
        .args(["send", &log])
        .assert()
        .success();

    stagehand_cmd(home.path())
        .args(["drain", "--local"])
        .assert()
        .success()
        .stdout(contains("Drained 2 message(s): 2 folded, 0 malformed"));

    stagehand_cmd(home.path())
        .arg("state")
        .assert()
        .success()
        .stdout(contains(r#""building": true"#))
        .stdout(contains(r#""fingerprint""#));

    stagehand_cmd(home.path())
        .args(["state", "--logs"])
        .assert()
        .success()
        .stdout(contains("site rebuilt"));
}

#[test]
fn malformed_delta_is_rejected_before_queueing() {
    let home = TempDir::new().expect("home");
    let site = TempDir::new().expect("site");
    init_site(&home, &site);

    stagehand_cmd(home.path())
        .args(["send", r#"{"display":{"building":[1,2]}}"#])
        .assert()
        .failure()
        .stderr(contains("delta is not a valid message"));
    assert!(!home.path().join(".stagehand/queue").exists());
}

#[test]
fn daemon_status_without_daemon_reports_not_running() {
    let home = TempDir::new().expect("home");
    stagehand_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains(r#""running": false"#));
}
