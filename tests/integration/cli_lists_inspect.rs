#![allow(missing_docs)]

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

fn seed_csv(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("edges.csv");
    let mut text = String::from("entity,value\n");
    for entity in 0..600u64 {
        for k in 0..entity % 4 {
            text.push_str(&format!("{entity},{}\n", entity * 100 + k));
        }
    }
    fs::write(&path, text).expect("write csv");
    path
}

fn build(dir: &TempDir) {
    let csv = seed_csv(dir);
    cargo_bin_cmd!("lists-inspect")
        .arg("--dir")
        .arg(dir.path())
        .args(["build", "edges", "--has-headers", "--threads", "2"])
        .arg("--csv")
        .arg(&csv)
        .assert()
        .success();
}

#[test]
fn build_then_scan_as_json() {
    let dir = TempDir::new().expect("tempdir");
    build(&dir);
    let output = cargo_bin_cmd!("lists-inspect")
        .arg("--dir")
        .arg(dir.path())
        .args(["--format", "json", "scan", "edges", "7"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json, serde_json::json!([700, 701, 702]));
}

#[test]
fn stats_emits_json() {
    let dir = TempDir::new().expect("tempdir");
    build(&dir);
    let output = cargo_bin_cmd!("lists-inspect")
        .arg("--dir")
        .arg(dir.path())
        .args(["--format", "json", "stats", "edges"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["entities"], 600);
    assert_eq!(json["chunks"], 2);
    assert_eq!(json["elements"], 900);
}

#[test]
fn header_dump_decodes_the_headers_file() {
    let dir = TempDir::new().expect("tempdir");
    build(&dir);
    let output = cargo_bin_cmd!("lists-inspect")
        .arg("header")
        .arg(dir.path().join("edges.lists.headers"))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    let first = text.lines().next().expect("hex line");
    assert_eq!(first.len(), 96);
    assert!(text.contains("elements"));
}

#[test]
fn missing_structure_fails() {
    let dir = TempDir::new().expect("tempdir");
    cargo_bin_cmd!("lists-inspect")
        .arg("--dir")
        .arg(dir.path())
        .args(["scan", "absent", "0"])
        .assert()
        .failure();
}
