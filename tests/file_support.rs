//! Multi-format ingest tests: PDF and Office documents route through the
//! parser fallback chain and become searchable.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ragctl_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("ragctl");
    path
}

/// Minimal valid PDF containing the text "spec test phrase".
/// Builds body then xref with correct byte offsets so pdf-extract can parse it.
fn minimal_pdf_with_phrase() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(b"4 0 obj << /Length 44 >> stream\nBT /F1 12 Tf 100 700 Td (spec test phrase) Tj ET\nendstream endobj\n");
    let o5 = out.len();
    out.extend_from_slice(b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n");
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o1).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o2).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o3).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o4).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o5).as_bytes());
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn minimal_docx_with_text(phrase: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn setup_env() -> (TempDir, PathBuf) {
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
        .unwrap_or_else(|e| panic!("Failed to run ragctl: {}", e));
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

// A searchable-text PDF ingests and is retrievable by keyword search.
#[test]
fn pdf_ingest_and_query() {
    let (tmp, config_path) = setup_env();
    let pdf_path = tmp.path().join("spec.pdf");
    fs::write(&pdf_path, minimal_pdf_with_phrase()).unwrap();

    run_ragctl(&config_path, &["migrate"]);
    let (stdout, stderr, success) = run_ragctl(
        &config_path,
        &["ingest", pdf_path.to_str().unwrap(), "--content-type", "application/pdf"],
    );
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    let document: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(document["status"], "success");

    let (query_out, _, success) =
        run_ragctl(&config_path, &["query", "spec test phrase", "--mode", "keyword"]);
    assert!(success);
    let answer: serde_json::Value = serde_json::from_str(&query_out).unwrap();
    assert!(!answer["citations"].as_array().unwrap().is_empty());
}

// An Office docx ingests via the OOXML parser.
#[test]
fn docx_ingest_and_query() {
    let (tmp, config_path) = setup_env();
    let docx_path = tmp.path().join("spec.docx");
    fs::write(&docx_path, minimal_docx_with_text("office test phrase")).unwrap();

    run_ragctl(&config_path, &["migrate"]);
    let (stdout, stderr, success) = run_ragctl(
        &config_path,
        &[
            "ingest",
            docx_path.to_str().unwrap(),
            "--content-type",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ],
    );
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);

    let (query_out, _, success) =
        run_ragctl(&config_path, &["query", "office test phrase", "--mode", "keyword"]);
    assert!(success);
    let answer: serde_json::Value = serde_json::from_str(&query_out).unwrap();
    assert!(!answer["citations"].as_array().unwrap().is_empty());
}

// A malformed PDF is classified scanned-image and falls through the
// fallback chain to the OCR/image-model parsers, which fail without a real
// provider configured; ingest reports partial/failed rather than panicking.
#[test]
fn corrupt_pdf_does_not_panic() {
    let (tmp, config_path) = setup_env();
    let bad_pdf = tmp.path().join("bad.pdf");
    fs::write(&bad_pdf, b"not a valid pdf").unwrap();

    run_ragctl(&config_path, &["migrate"]);
    let (stdout, stderr, success) = run_ragctl(
        &config_path,
        &["ingest", bad_pdf.to_str().unwrap(), "--content-type", "application/pdf"],
    );
    assert!(success, "ingest should not crash on a corrupt pdf: {}", stderr);
    let document: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_ne!(document["status"], "success");
}

// Plain text ingest stores the given content-type verbatim.
#[test]
fn content_type_is_stored_on_the_document() {
    let (tmp, config_path) = setup_env();
    let path = tmp.path().join("note.txt");
    fs::write(&path, "Rust is a systems programming language.").unwrap();

    run_ragctl(&config_path, &["migrate"]);
    let (stdout, _, success) = run_ragctl(&config_path, &["ingest", path.to_str().unwrap()]);
    assert!(success);
    let document: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(document["upload_metadata"]["source"], "upload");
}
