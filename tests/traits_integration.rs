//! Integration tests for the `Tool` trait and the seven built-in
//! Gateway-backed tools, exercised in-process against a real SQLite store
//! and file-backed registry.

use std::sync::Arc;

use ragctl::config::Config;
use ragctl::gateway::Gateway;
use ragctl::traits::{Tool, ToolContext, ToolRegistry};
use serde_json::json;
use tempfile::TempDir;

fn test_config(tmp: &TempDir) -> Config {
    let toml = format!(
        r#"
[db]
path = "{db}"

[server]
bind = "127.0.0.1:0"

[registry]
root = "{registry}"
"#,
        db = tmp.path().join("ragctl.sqlite").display(),
        registry = tmp.path().join("registry").display(),
    );
    toml::from_str(&toml).expect("valid test config")
}

async fn test_gateway() -> (TempDir, Arc<Gateway>) {
    let tmp = TempDir::new().unwrap();
    let gateway = Gateway::open(test_config(&tmp)).await.expect("gateway opens");
    (tmp, Arc::new(gateway))
}

fn sample_text() -> Vec<u8> {
    b"Rust ownership rules prevent data races at compile time.".to_vec()
}

#[tokio::test]
async fn registry_contains_seven_builtins() {
    let registry = ToolRegistry::with_builtins();
    assert_eq!(registry.len(), 7);
    for name in [
        "search_knowledge_base",
        "ingest_document",
        "list_documents",
        "get_document_status",
        "delete_document",
        "manage_index",
        "get_system_stats",
    ] {
        assert!(registry.find(name).is_some(), "missing tool: {name}");
    }
}

#[tokio::test]
async fn ingest_then_list_then_status_roundtrip() {
    let (_tmp, gateway) = test_gateway().await;
    let tools = ToolRegistry::with_builtins();
    let ctx = ToolContext::new(gateway.clone());

    use base64::Engine;
    let content_b64 = base64::engine::general_purpose::STANDARD.encode(sample_text());

    let ingest = tools.find("ingest_document").unwrap();
    let result = ingest
        .execute(
            json!({
                "source_name": "ownership.txt",
                "content_type": "text/plain",
                "content_base64": content_b64,
            }),
            &ctx,
        )
        .await
        .expect("ingest succeeds");
    let document_id = result["document_id"].as_str().unwrap().to_string();
    assert_eq!(result["name"], "ownership.txt");

    let list = tools.find("list_documents").unwrap();
    let listed = list.execute(json!({}), &ctx).await.unwrap();
    assert_eq!(listed["total"], 1);

    let status = tools.find("get_document_status").unwrap();
    let status_result = status
        .execute(json!({ "document_id": document_id }), &ctx)
        .await
        .unwrap();
    assert_eq!(status_result["document_id"], document_id);
}

#[tokio::test]
async fn ingest_then_search_returns_citation() {
    let (_tmp, gateway) = test_gateway().await;
    let tools = ToolRegistry::with_builtins();
    let ctx = ToolContext::new(gateway.clone());

    use base64::Engine;
    let content_b64 = base64::engine::general_purpose::STANDARD.encode(sample_text());
    tools
        .find("ingest_document")
        .unwrap()
        .execute(
            json!({
                "source_name": "ownership.txt",
                "content_type": "text/plain",
                "content_base64": content_b64,
            }),
            &ctx,
        )
        .await
        .unwrap();

    let search = tools.find("search_knowledge_base").unwrap();
    let answer = search
        .execute(json!({ "question": "what prevents data races", "search_mode": "keyword" }), &ctx)
        .await
        .unwrap();
    let citations = answer["citations"].as_array().unwrap();
    assert!(!citations.is_empty(), "expected at least one citation, got: {answer}");
}

#[tokio::test]
async fn delete_document_removes_it_from_list() {
    let (_tmp, gateway) = test_gateway().await;
    let tools = ToolRegistry::with_builtins();
    let ctx = ToolContext::new(gateway.clone());

    use base64::Engine;
    let content_b64 = base64::engine::general_purpose::STANDARD.encode(sample_text());
    let document = tools
        .find("ingest_document")
        .unwrap()
        .execute(
            json!({
                "source_name": "ownership.txt",
                "content_type": "text/plain",
                "content_base64": content_b64,
            }),
            &ctx,
        )
        .await
        .unwrap();
    let document_id = document["document_id"].as_str().unwrap().to_string();

    tools
        .find("delete_document")
        .unwrap()
        .execute(json!({ "document_id": document_id }), &ctx)
        .await
        .unwrap();

    let list = tools.find("list_documents").unwrap().execute(json!({}), &ctx).await.unwrap();
    assert_eq!(list["total"], 0);
}

#[tokio::test]
async fn manage_index_status_reports_index_state() {
    let (_tmp, gateway) = test_gateway().await;
    let tools = ToolRegistry::with_builtins();
    let ctx = ToolContext::new(gateway.clone());

    use base64::Engine;
    let content_b64 = base64::engine::general_purpose::STANDARD.encode(sample_text());
    let document = tools
        .find("ingest_document")
        .unwrap()
        .execute(
            json!({
                "source_name": "ownership.txt",
                "content_type": "text/plain",
                "content_base64": content_b64,
            }),
            &ctx,
        )
        .await
        .unwrap();
    let document_id = document["document_id"].as_str().unwrap().to_string();

    let status = tools
        .find("manage_index")
        .unwrap()
        .execute(json!({ "document_id": document_id, "action": "status" }), &ctx)
        .await
        .unwrap();
    assert_eq!(status["text_indexed"], true);
}

#[tokio::test]
async fn get_system_stats_counts_ingested_document() {
    let (_tmp, gateway) = test_gateway().await;
    let tools = ToolRegistry::with_builtins();
    let ctx = ToolContext::new(gateway.clone());

    use base64::Engine;
    let content_b64 = base64::engine::general_purpose::STANDARD.encode(sample_text());
    tools
        .find("ingest_document")
        .unwrap()
        .execute(
            json!({
                "source_name": "ownership.txt",
                "content_type": "text/plain",
                "content_base64": content_b64,
            }),
            &ctx,
        )
        .await
        .unwrap();

    let stats = tools.find("get_system_stats").unwrap().execute(json!({}), &ctx).await.unwrap();
    assert_eq!(stats["total_documents"], 1);
    assert_eq!(stats["success"], 1);
}

#[tokio::test]
async fn required_field_missing_errors_instead_of_panicking() {
    let (_tmp, gateway) = test_gateway().await;
    let tools = ToolRegistry::with_builtins();
    let ctx = ToolContext::new(gateway.clone());

    let err = tools
        .find("get_document_status")
        .unwrap()
        .execute(json!({}), &ctx)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("document_id"));
}
