//! End-to-end tests for the `seamless` CLI binary.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn write_graph(dir: &TempDir, name: &str, json: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, json).expect("failed to write graph file");
    path
}

#[test]
fn validate_reports_cell_and_worker_counts() {
    let dir = TempDir::new().unwrap();
    let graph = write_graph(
        &dir,
        "graph.json",
        r#"{
            "cells": [
                {"name": "a", "kind": "json", "value": "3"},
                {"name": "b", "kind": "json"}
            ],
            "aliases": [{"source": "a", "target": "b", "direction": "one-way"}]
        }"#,
    );

    Command::cargo_bin("seamless")
        .unwrap()
        .args(["validate", graph.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 cell(s)"));
}

#[test]
fn validate_rejects_missing_alias_target() {
    let dir = TempDir::new().unwrap();
    let graph = write_graph(
        &dir,
        "graph.json",
        r#"{
            "cells": [{"name": "a", "kind": "json"}],
            "aliases": [{"source": "a", "target": "missing"}]
        }"#,
    );

    Command::cargo_bin("seamless")
        .unwrap()
        .args(["validate", graph.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing"));
}

#[test]
fn run_equilibrates_an_alias_chain() {
    let dir = TempDir::new().unwrap();
    let graph = write_graph(
        &dir,
        "graph.json",
        r#"{
            "cells": [
                {"name": "source", "kind": "json", "value": "10"},
                {"name": "mirror", "kind": "json"}
            ],
            "aliases": [{"source": "source", "target": "mirror", "direction": "one-way"}]
        }"#,
    );

    let output = Command::cargo_bin("seamless")
        .unwrap()
        .args(["run", graph.to_str().unwrap()])
        .output()
        .expect("failed to run seamless");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout: serde_json::Value = serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(stdout["cells"]["mirror"], serde_json::json!(10));
    assert_eq!(stdout["unstable_workers"], serde_json::json!(0));
}

#[test]
fn run_drives_a_worker_through_feed_and_emit() {
    let dir = TempDir::new().unwrap();
    let graph = write_graph(
        &dir,
        "graph.json",
        r#"{
            "cells": [
                {"name": "in", "kind": "json", "value": "5"},
                {"name": "out", "kind": "json"}
            ],
            "workers": [
                {
                    "name": "echo",
                    "pins": [
                        {"name": "in", "kind": "input", "dtype": "json"},
                        {"name": "out", "kind": "output", "dtype": "json"}
                    ]
                }
            ],
            "pin_connections": [
                {"cell": "in", "worker": "echo", "pin": "in"},
                {"cell": "out", "worker": "echo", "pin": "out"}
            ]
        }"#,
    );

    let output = Command::cargo_bin("seamless")
        .unwrap()
        .args(["run", graph.to_str().unwrap()])
        .output()
        .expect("failed to run seamless");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout: serde_json::Value = serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(stdout["cells"]["out"], serde_json::json!(5));
}

#[test]
fn run_nonexistent_graph_reports_io_error() {
    Command::cargo_bin("seamless")
        .unwrap()
        .args(["run", "/nonexistent/graph.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("reading graph file"));
}

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("seamless")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Run").and(predicate::str::contains("Validate")));
}
