//! End-to-end tests driving the `ragctl` binary: migrate, ingest, query,
//! documents, stats.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ragctl_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ragctl");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{db}"

[server]
bind = "127.0.0.1:0"

[registry]
root = "{registry}"
"#,
        db = root.join("data/ragctl.sqlite").display(),
        registry = root.join("data/registry").display(),
    );

    let config_path = root.join("config/ragctl.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ragctl(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ragctl_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ragctl binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn write_source(tmp: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = tmp.path().join(name);
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_migrate_creates_schema() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_ragctl(&config_path, &["migrate"]);
    assert!(success, "migrate failed: stdout={}, stderr={}", stdout, stderr);
}

#[test]
fn test_migrate_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    let (_, _, success1) = run_ragctl(&config_path, &["migrate"]);
    assert!(success1, "first migrate failed");
    let (_, _, success2) = run_ragctl(&config_path, &["migrate"]);
    assert!(success2, "second migrate failed (not idempotent)");
}

#[test]
fn test_ingest_text_file() {
    let (tmp, config_path) = setup_test_env();
    let path = write_source(
        &tmp,
        "alpha.txt",
        "This document is about Rust programming and cargo crates.",
    );

    run_ragctl(&config_path, &["migrate"]);
    let (stdout, stderr, success) =
        run_ragctl(&config_path, &["ingest", path.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);

    let document: serde_json::Value = serde_json::from_str(&stdout).expect("ingest prints json");
    assert_eq!(document["name"], "alpha.txt");
    assert_eq!(document["status"], "success");
}

#[test]
fn test_ingest_then_documents_list() {
    let (tmp, config_path) = setup_test_env();
    let path = write_source(&tmp, "alpha.txt", "Document about Rust.");

    run_ragctl(&config_path, &["migrate"]);
    run_ragctl(&config_path, &["ingest", path.to_str().unwrap()]);

    let (stdout, stderr, success) = run_ragctl(&config_path, &["documents", "list"]);
    assert!(success, "documents list failed: {}", stderr);
    let documents: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0]["name"], "alpha.txt");
}

#[test]
fn test_ingest_then_documents_get() {
    let (tmp, config_path) = setup_test_env();
    let path = write_source(&tmp, "alpha.txt", "Document about Rust.");

    run_ragctl(&config_path, &["migrate"]);
    let (ingest_out, _, _) = run_ragctl(&config_path, &["ingest", path.to_str().unwrap()]);
    let document: serde_json::Value = serde_json::from_str(&ingest_out).unwrap();
    let document_id = document["document_id"].as_str().unwrap();

    let (stdout, stderr, success) = run_ragctl(&config_path, &["documents", "get", document_id]);
    assert!(success, "documents get failed: {}", stderr);
    let fetched: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(fetched["document_id"], document_id);
}

#[test]
fn test_documents_get_missing_errors() {
    let (_tmp, config_path) = setup_test_env();
    run_ragctl(&config_path, &["migrate"]);

    let (_, stderr, success) = run_ragctl(&config_path, &["documents", "get", "nonexistent-id"]);
    assert!(!success, "documents get with missing id should fail");
    assert!(
        stderr.contains("not found") || stderr.contains("error"),
        "should report not found, got: {}",
        stderr
    );
}

#[test]
fn test_ingest_then_delete() {
    let (tmp, config_path) = setup_test_env();
    let path = write_source(&tmp, "alpha.txt", "Document about Rust.");

    run_ragctl(&config_path, &["migrate"]);
    let (ingest_out, _, _) = run_ragctl(&config_path, &["ingest", path.to_str().unwrap()]);
    let document: serde_json::Value = serde_json::from_str(&ingest_out).unwrap();
    let document_id = document["document_id"].as_str().unwrap();

    let (stdout, stderr, success) =
        run_ragctl(&config_path, &["documents", "delete", document_id]);
    assert!(success, "delete failed: {}", stderr);
    assert!(stdout.contains(document_id));

    let (list_out, _, _) = run_ragctl(&config_path, &["documents", "list"]);
    let documents: Vec<serde_json::Value> = serde_json::from_str(&list_out).unwrap();
    assert!(documents.is_empty());
}

#[test]
fn test_query_keyword_mode() {
    let (tmp, config_path) = setup_test_env();
    let path = write_source(
        &tmp,
        "alpha.txt",
        "The quokka is a small marsupial native to Western Australia.",
    );

    run_ragctl(&config_path, &["migrate"]);
    run_ragctl(&config_path, &["ingest", path.to_str().unwrap()]);

    let (stdout, stderr, success) = run_ragctl(
        &config_path,
        &["query", "what is a quokka", "--mode", "keyword"],
    );
    assert!(success, "query failed: stdout={}, stderr={}", stdout, stderr);
    let answer: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let citations = answer["citations"].as_array().unwrap();
    assert!(!citations.is_empty(), "expected at least one citation, got: {}", stdout);
}

#[test]
fn test_query_semantic_mode_falls_back_with_warning_when_embeddings_disabled() {
    let (tmp, config_path) = setup_test_env();
    let path = write_source(&tmp, "alpha.txt", "A short note about marsupials.");

    run_ragctl(&config_path, &["migrate"]);
    run_ragctl(&config_path, &["ingest", path.to_str().unwrap()]);

    let (stdout, _, success) = run_ragctl(
        &config_path,
        &["query", "marsupials", "--mode", "semantic"],
    );
    assert!(success, "query should still succeed by falling back to keyword search");
    let answer: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let warnings = answer["warnings"].as_array().unwrap();
    assert!(warnings.iter().any(|w| w.as_str().unwrap().contains("embeddings")));
}

#[test]
fn test_query_no_results() {
    let (_tmp, config_path) = setup_test_env();
    run_ragctl(&config_path, &["migrate"]);

    let (stdout, _, success) = run_ragctl(&config_path, &["query", "xyznonexistentphrase"]);
    assert!(success);
    let answer: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(answer["num_chunks_used"], 0);
}

#[test]
fn test_stats_reports_document_count() {
    let (tmp, config_path) = setup_test_env();
    let path = write_source(&tmp, "alpha.txt", "A note about Rust.");

    run_ragctl(&config_path, &["migrate"]);
    run_ragctl(&config_path, &["ingest", path.to_str().unwrap()]);

    let (stdout, stderr, success) = run_ragctl(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("1 total"), "expected 1 document, got: {}", stdout);
}

#[test]
fn test_completions_generates_script() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_ragctl(&config_path, &["completions", "bash"]);
    assert!(success, "completions failed: {}", stderr);
    assert!(stdout.contains("ragctl"));
}
