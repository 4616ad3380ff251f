//! End-to-end CLI tests for the repo-mirror binary.

#![allow(deprecated)]

mod support;

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use support::fixture::{RepoFixture, binary_packages};
use tempfile::TempDir;

/// Command with an empty config home so no user configuration leaks in.
fn repo_mirror(config_home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("repo-mirror").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home).env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_binary_help_displays_usage() {
    let temp = TempDir::new().unwrap();
    repo_mirror(temp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Mirror RPM-MD package repositories"));
}

#[test]
fn test_binary_version_displays_version() {
    let temp = TempDir::new().unwrap();
    repo_mirror(temp.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("repo-mirror"));
}

#[test]
fn test_binary_without_config_does_nothing() {
    let temp = TempDir::new().unwrap();
    repo_mirror(temp.path()).arg("-q").assert().success();
}

#[test]
fn test_binary_invalid_flag_returns_error() {
    let temp = TempDir::new().unwrap();
    repo_mirror(temp.path())
        .arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_binary_rejects_unknown_config_key() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), "mirror_dir = \"/srv/mirror\"\ncolour = \"blue\"\n");
    repo_mirror(temp.path())
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown configuration key"));
}

#[test]
fn test_binary_missing_explicit_config_fails() {
    let temp = TempDir::new().unwrap();
    repo_mirror(temp.path())
        .arg("--config")
        .arg(temp.path().join("absent.toml"))
        .assert()
        .failure();
}

#[test]
fn test_binary_mirrors_configured_repository() {
    let temp = TempDir::new().unwrap();
    let fixture = RepoFixture::write(
        &temp.path().join("upstream/repo"),
        binary_packages(3, "cli"),
        Vec::new(),
    );
    let mirror_dir = temp.path().join("mirror");
    let config = write_config(
        temp.path(),
        &format!(
            "mirror_dir = \"{}\"\n\n[[repository]]\nurl = \"{}\"\nlocal_path = \"repo\"\n",
            mirror_dir.display(),
            fixture.file_url()
        ),
    );

    repo_mirror(temp.path())
        .arg("--config")
        .arg(&config)
        .assert()
        .success();

    assert_eq!(
        std::fs::read(mirror_dir.join("repo/repodata/repomd.xml")).unwrap(),
        fixture.index_bytes()
    );
    for package in &fixture.packages {
        assert!(mirror_dir.join("repo").join(&package.location).is_file());
    }
}

#[test]
fn test_binary_failing_repository_sets_exit_code() {
    let temp = TempDir::new().unwrap();
    let good = RepoFixture::write(
        &temp.path().join("upstream/good"),
        binary_packages(1, "cli"),
        Vec::new(),
    );
    std::fs::create_dir_all(temp.path().join("upstream/empty")).unwrap();
    let empty_url = url::Url::from_directory_path(temp.path().join("upstream/empty")).unwrap();
    let mirror_dir = temp.path().join("mirror");
    let config = write_config(
        temp.path(),
        &format!(
            "mirror_dir = \"{}\"\n\n[[repository]]\nurl = \"{empty_url}\"\nlocal_path = \"empty\"\n\n[[repository]]\nurl = \"{}\"\nlocal_path = \"good\"\n",
            mirror_dir.display(),
            good.file_url()
        ),
    );

    repo_mirror(temp.path())
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("1 of 2 repositories were not mirrored"));

    assert!(mirror_dir.join("good/repodata/repomd.xml").is_file());
}
