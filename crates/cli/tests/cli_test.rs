//! CLI integration tests.

#![allow(deprecated)] // Command::cargo_bin deprecated for custom build-dir; still works for default

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use pretty_assertions::assert_eq;

fn booksearch() -> Command {
    Command::cargo_bin("booksearch").unwrap()
}

fn sites_json(state: &Path) -> Vec<serde_json::Value> {
    let out = booksearch()
        .arg("--state")
        .arg(state)
        .args(["sites", "list", "--json"])
        .assert()
        .success();
    serde_json::from_slice(&out.get_output().stdout).expect("sites list --json should output valid JSON")
}

fn ids(rows: &[serde_json::Value]) -> Vec<u64> {
    rows.iter().map(|r| r["id"].as_u64().unwrap()).collect()
}

#[test]
fn help_prints_and_exits_success() {
    booksearch().arg("--help").assert().success();
}

#[test]
fn sites_list_defaults_in_rank_order() {
    let dir = tempfile::tempdir().unwrap();
    let rows = sites_json(&dir.path().join("sites.toml"));
    assert_eq!(ids(&rows), vec![5, 2, 6, 1, 8, 7, 9]);
    assert_eq!(rows[0]["name"], "ISFDB");
    assert_eq!(rows[4]["enabled"], false);
}

#[test]
fn disable_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("sites.toml");
    booksearch()
        .arg("--state")
        .arg(&state)
        .args(["sites", "disable", "2"])
        .assert()
        .success();
    assert!(state.exists());

    let rows = sites_json(&state);
    let amazon = rows.iter().find(|r| r["id"] == 2).unwrap();
    assert_eq!(amazon["enabled"], false);
}

#[test]
fn order_then_reset() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("sites.toml");
    booksearch()
        .arg("--state")
        .arg(&state)
        .args(["sites", "order", "1,6"])
        .assert()
        .success();
    assert_eq!(ids(&sites_json(&state)), vec![1, 6, 5, 2, 8, 7, 9]);

    booksearch()
        .arg("--state")
        .arg(&state)
        .args(["sites", "reset"])
        .assert()
        .success();
    assert_eq!(ids(&sites_json(&state)), vec![5, 2, 6, 1, 8, 7, 9]);
}

#[test]
fn enabling_site_outside_list_fails() {
    let dir = tempfile::tempdir().unwrap();
    booksearch()
        .arg("--state")
        .arg(dir.path().join("sites.toml"))
        .args(["sites", "enable", "4"])
        .assert()
        .failure();
}

#[test]
fn covers_list_holds_cover_providers() {
    let dir = tempfile::tempdir().unwrap();
    let out = booksearch()
        .arg("--state")
        .arg(dir.path().join("sites.toml"))
        .args(["sites", "list", "--list", "covers", "--json"])
        .assert()
        .success();
    let rows: Vec<serde_json::Value> = serde_json::from_slice(&out.get_output().stdout).unwrap();
    assert_eq!(ids(&rows), vec![5, 2, 6, 1, 8, 7]);
}

#[test]
fn unknown_list_is_rejected() {
    booksearch().args(["sites", "list", "--list", "nope"]).assert().failure();
}

#[test]
fn isbn_json_report() {
    let out = booksearch()
        .args(["isbn", "978-0-306-40615-7", "--json"])
        .assert()
        .success();
    let v: serde_json::Value = serde_json::from_slice(&out.get_output().stdout).unwrap();
    assert_eq!(v["kind"], "isbn13");
    assert_eq!(v["valid"], true);
    assert_eq!(v["isbn10"], "0306406152");
}

#[test]
fn invalid_isbn_fails() {
    booksearch().args(["isbn", "9780306406158"]).assert().failure();
}

#[test]
fn barcode_needs_lenient() {
    booksearch().args(["isbn", "036000291452"]).assert().failure();
    booksearch()
        .args(["isbn", "036000291452", "--lenient"])
        .assert()
        .success();
}

fn png(dir: &Path, name: &str, w: u32, h: u32) -> PathBuf {
    let path = dir.join(name);
    image::RgbImage::new(w, h).save(&path).unwrap();
    path
}

#[test]
fn covers_keeps_largest() {
    let dir = tempfile::tempdir().unwrap();
    let small = png(dir.path(), "small.png", 5, 5);
    let large = png(dir.path(), "large.png", 9, 9);

    let out = booksearch()
        .arg("covers")
        .arg(&small)
        .arg(&large)
        .arg("--json")
        .assert()
        .success();
    let v: serde_json::Value = serde_json::from_slice(&out.get_output().stdout).unwrap();
    assert_eq!(v["winner"], large.to_str().unwrap());
    assert!(large.exists());
    assert!(!small.exists());
}

#[test]
fn covers_dry_run_deletes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let small = png(dir.path(), "small.png", 5, 5);
    let large = png(dir.path(), "large.png", 9, 9);

    booksearch()
        .arg("covers")
        .arg(&small)
        .arg(&large)
        .arg("--dry-run")
        .assert()
        .success();
    assert!(small.exists());
    assert!(large.exists());
}

#[test]
fn covers_without_images_fails() {
    booksearch()
        .args(["covers", "/nonexistent/cover.jpg"])
        .assert()
        .failure();
}

#[test]
fn config_show_json_valid() {
    let dir = tempfile::tempdir().unwrap();
    let out = booksearch()
        .env("XDG_CONFIG_HOME", dir.path())
        .args(["config", "show", "--json"])
        .assert()
        .success();
    let v: serde_json::Value =
        serde_json::from_slice(&out.get_output().stdout).expect("config show --json should output valid JSON");
    assert_eq!(v["search"]["strict_isbn"], true);
}

#[test]
fn config_set_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    booksearch()
        .env("XDG_CONFIG_HOME", dir.path())
        .args(["config", "set", "search.fetch_back_cover", "true"])
        .assert()
        .success();
    let out = booksearch()
        .env("XDG_CONFIG_HOME", dir.path())
        .args(["config", "show", "--json"])
        .assert()
        .success();
    let v: serde_json::Value = serde_json::from_slice(&out.get_output().stdout).unwrap();
    assert_eq!(v["search"]["fetch_back_cover"], true);

    booksearch()
        .env("XDG_CONFIG_HOME", dir.path())
        .args(["config", "set", "search.strict_isbn", "maybe"])
        .assert()
        .failure();
    booksearch()
        .env("XDG_CONFIG_HOME", dir.path())
        .args(["config", "set", "nope.key", "1"])
        .assert()
        .failure();
}
