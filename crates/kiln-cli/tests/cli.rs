//! End-to-end tests for the kiln binary.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn project() -> TempDir {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(
        root.join("src/app.ts"),
        "import { h } from 'preact';\nexport const view = h('div', null);\n",
    )
    .unwrap();
    fs::write(
        root.join("kiln.toml"),
        "source_root = \"src\"\nprewarm = [\"dayjs\"]\n\n[globals]\nreact = \"React\"\n",
    )
    .unwrap();
    temp
}

fn kiln(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("kiln").unwrap();
    cmd.current_dir(dir);
    cmd
}

#[test]
fn test_check_lists_trusted_packages() {
    let temp = project();
    kiln(temp.path())
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("public_prefix = \"/modules\""))
        .stdout(predicate::str::contains("preact"))
        .stdout(predicate::str::contains("react"))
        .stdout(predicate::str::contains("dayjs"));
}

#[test]
fn test_check_reports_missing_root_with_hint() {
    let temp = project();
    kiln(temp.path())
        .args(["check", "--root", "does-not-exist"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("source root not found"))
        .stderr(predicate::str::contains("hint:"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let temp = project();
    fs::write(temp.path().join("bad.toml"), "vendor_subpath = \"a/b\"\n").unwrap();
    kiln(temp.path())
        .args(["check", "--config", "bad.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("vendor_subpath"));
}

#[test]
fn test_clean_removes_cache() {
    let temp = project();
    let cache = temp.path().join(".kiln/cache");
    fs::create_dir_all(&cache).unwrap();
    fs::write(cache.join("preact.js"), "export {};").unwrap();

    kiln(temp.path())
        .arg("clean")
        .assert()
        .success()
        .stdout(predicate::str::contains("removed 1"));
    assert!(!cache.exists());
}

#[test]
fn test_prewarm_reports_missing_packages() {
    let temp = project();
    kiln(temp.path())
        .arg("prewarm")
        .assert()
        .failure()
        .stdout(predicate::str::contains("0/1 packages ready"));
}
