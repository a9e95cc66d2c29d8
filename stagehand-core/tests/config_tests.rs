//! Config error-message and validation integration tests.

use std::fs;
use std::path::PathBuf;

use rstest::rstest;
use stagehand_core::{config, ConfigError};
use tempfile::TempDir;

fn write_config(home: &TempDir, yaml: &str) {
    let dir = home.path().join(".stagehand");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("config.yaml"), yaml).expect("write");
}

#[test]
fn corrupt_yaml_returns_parse_error_with_path() {
    let home = TempDir::new().expect("tempdir");
    write_config(&home, ": : corrupt : yaml : !!!\n  - broken: [unclosed");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn minimal_config_fills_defaults() {
    let home = TempDir::new().expect("tempdir");
    write_config(
        &home,
        "site:\n  source_dir: /srv/out\n  test_store: /srv/test\n  prod_store: /srv/prod\n\
         state:\n  store_root: /srv/state\n  queue_dir: /srv/queue\n",
    );

    let loaded = config::load_at(home.path()).expect("load");
    assert_eq!(loaded.site.source_dir, PathBuf::from("/srv/out"));
    assert_eq!(loaded.state.state_key, "state/state.json");
    assert_eq!(loaded.state.log_key.as_deref(), Some("state/logs.json"));
    assert_eq!(loaded.state.snapshot_clear_secs, 3600);
    assert_eq!(loaded.sync.shared_max_age_secs, 86_400);
    assert_eq!(loaded.poll.active_operations.len(), 3);
}

#[rstest]
#[case("sync:\n  batch_size: 0\n", "sync.batch_size")]
#[case("lease:\n  timeout_secs: 0\n", "lease.timeout_secs")]
fn invalid_values_are_rejected(#[case] extra: &str, #[case] field: &str) {
    let home = TempDir::new().expect("tempdir");
    write_config(
        &home,
        &format!(
            "site:\n  source_dir: /a\n  test_store: /b\n  prod_store: /c\n\
             state:\n  store_root: /d\n  queue_dir: /e\n{extra}"
        ),
    );

    let err = config::load_at(home.path()).unwrap_err();
    assert!(err.to_string().contains(field), "got: {err}");
}

#[test]
fn snapshot_ttls_must_be_ordered() {
    let home = TempDir::new().expect("tempdir");
    let mut cfg = config::Config::default_at(home.path(), PathBuf::from("/srv/out"));
    cfg.state.snapshot_delete_secs = 60;
    assert!(matches!(
        cfg.validate(),
        Err(ConfigError::Invalid {
            field: "state.snapshot_delete_secs",
            ..
        })
    ));
}

#[rstest]
#[case("/srv/test/state", "/srv/queue", "state.store_root")]
#[case("/srv/prod", "/srv/queue", "state.store_root")]
#[case("/srv/state", "/srv", "state.queue_dir")]
fn overlapping_store_roots_are_rejected(
    #[case] store_root: &str,
    #[case] queue_dir: &str,
    #[case] field: &str,
) {
    let home = TempDir::new().expect("tempdir");
    write_config(
        &home,
        &format!(
            "site:\n  source_dir: /srv/out\n  test_store: /srv/test\n  prod_store: /srv/prod\n\
             state:\n  store_root: {store_root}\n  queue_dir: {queue_dir}\n"
        ),
    );

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { .. }), "got: {err}");
    assert!(err.to_string().contains(field), "got: {err}");
}

#[test]
fn stores_sharing_a_root_under_distinct_prefixes_are_accepted() {
    let home = TempDir::new().expect("tempdir");
    write_config(
        &home,
        "site:\n  source_dir: /srv/out\n  test_store: /srv/bucket\n  prod_store: /srv/bucket\n\
         \x20 test_prefix: test\n  prod_prefix: prod/\n\
         state:\n  store_root: /srv/state\n  queue_dir: /srv/queue\n",
    );

    let loaded = config::load_at(home.path()).expect("load");
    assert_eq!(loaded.site.prod_prefix, "prod/");
}
