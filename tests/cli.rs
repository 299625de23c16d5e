use std::fs::write;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::{tempdir, NamedTempFile};

const OVERRIDES: [&str; 4] = [
    "ASSET_SYNC_STORE_ROOT",
    "ASSET_SYNC_RELIST_INTERVAL_SECS",
    "ASSET_SYNC_UPLOAD_WORKERS",
    "ASSET_SYNC_VERIFY_TLS",
];

fn command() -> Command {
    let mut cmd = Command::cargo_bin("asset-sync").expect("Binary exists");
    for var in OVERRIDES {
        cmd.env_remove(var);
    }
    cmd
}

/// Writes a config publishing one local file into one declared bucket.
fn create_config(store_root: &Path, scratch: &Path, source: &Path) -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    let yaml = format!(
        r#"
store_root: {store}
loader:
  temporary_dir: {scratch}
bucket:
  retry_delay_ms: 0
buckets:
  - name: public
    public: true
assets:
  - name: guide
    spec:
      source:
        url: "file://{source}"
        mode: single
      bucket_ref:
        name: public
"#,
        store = store_root.display(),
        scratch = scratch.display(),
        source = source.display(),
    );
    write(config.path(), yaml).expect("Writing temp config failed");
    config
}

#[test]
fn run_once_publishes_configured_assets() {
    let store_root = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let sources = tempdir().unwrap();
    let source = sources.path().join("guide.md");
    write(&source, "# guide").unwrap();
    let config = create_config(store_root.path(), scratch.path(), &source);

    command()
        .arg("run")
        .arg("--config")
        .arg(config.path())
        .arg("--once")
        .assert()
        .success()
        .stdout(predicate::str::contains("default/guide: Ready/Uploaded"));

    let published = store_root.path().join("public/guide/guide.md");
    assert_eq!(std::fs::read_to_string(published).unwrap(), "# guide");
    assert!(store_root.path().join(".policies/public.json").exists());
}

#[test]
fn run_once_fails_when_content_cannot_be_pulled() {
    let store_root = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let config = create_config(
        store_root.path(),
        scratch.path(),
        Path::new("/definitely/not/here.md"),
    );

    command()
        .arg("run")
        .arg("--config")
        .arg(config.path())
        .arg("--once")
        .assert()
        .failure()
        .stdout(predicate::str::contains("Failed/PullingFailed"));
}

#[test]
fn buckets_command_prints_system_bucket_names() {
    let store_root = tempdir().unwrap();
    let config = NamedTempFile::new().unwrap();
    write(
        config.path(),
        format!("store_root: {}\n", store_root.path().display()),
    )
    .unwrap();

    command()
        .arg("buckets")
        .arg("--config")
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("public: system-public-"))
        .stdout(predicate::str::contains("private: system-private-"));

    let created = std::fs::read_dir(store_root.path()).unwrap().count();
    // Two bucket directories plus the policy directory.
    assert_eq!(created, 3);
}

#[test]
fn missing_config_file_fails() {
    command()
        .arg("run")
        .arg("--config")
        .arg("/definitely/not/here.yaml")
        .assert()
        .failure();
}
