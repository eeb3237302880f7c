//! In-process Gateway tests for rename tolerance, concurrent update
//! conflicts, hybrid/keyword retrieval equivalence, and partial ingest.
//! Complements `traits_integration.rs`'s Tool-surface coverage by driving
//! `Gateway` directly where the CLI and MCP tool surface have no equivalent
//! (e.g. there is no CLI rename subcommand).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use ragctl::config::{ChunkingStrategy, Config, SearchMode};
use ragctl::gateway::Gateway;
use ragctl::ingest::IngestOptions;
use ragctl::models::{Document, DocumentStatus};
use ragctl::progress::NoProgress;
use ragctl::registry::RegistryError;
use ragctl::retrieval::QueryOptions;
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

fn test_config_with_embedding(tmp: &TempDir, embed_url: &str, dims: usize) -> Config {
    let toml = format!(
        r#"
[db]
path = "{db}"

[server]
bind = "127.0.0.1:0"

[registry]
root = "{registry}"

[embedding]
provider = "ollama"
model = "mock-embed"
dims = {dims}
url = "{embed_url}"
batch_size = 1
max_retries = 0
timeout_secs = 5
"#,
        db = tmp.path().join("ragctl.sqlite").display(),
        registry = tmp.path().join("registry").display(),
    );
    toml::from_str(&toml).expect("valid test config with embedding")
}

async fn test_gateway() -> (TempDir, Gateway) {
    let tmp = TempDir::new().unwrap();
    let gateway = Gateway::open(test_config(&tmp)).await.expect("gateway opens");
    (tmp, gateway)
}

async fn test_gateway_with_embedding(embed_url: &str, dims: usize) -> (TempDir, Gateway) {
    let tmp = TempDir::new().unwrap();
    let gateway = Gateway::open(test_config_with_embedding(&tmp, embed_url, dims))
        .await
        .expect("gateway opens");
    (tmp, gateway)
}

async fn ingest_text(gateway: &Gateway, name: &str, text: &str) -> Document {
    gateway
        .ingest_document("text/plain", text.as_bytes(), name, IngestOptions::default(), &NoProgress)
        .await
        .expect("ingest succeeds")
}

async fn ingest_text_with_strategy(
    gateway: &Gateway,
    name: &str,
    text: &str,
    strategy: ChunkingStrategy,
) -> Document {
    let options = IngestOptions {
        chunking_strategy: Some(strategy),
        ..IngestOptions::default()
    };
    gateway
        .ingest_document("text/plain", text.as_bytes(), name, options, &NoProgress)
        .await
        .expect("ingest succeeds")
}

/// A closure deciding, for one `/api/embed` call's input texts, whether to
/// return vectors or fail the request outright.
type EmbedFn = Arc<dyn Fn(&[String]) -> Result<Vec<Vec<f32>>, ()> + Send + Sync>;

/// Minimal stand-in for a local Ollama instance: serves `POST /api/embed`
/// against the same request/response shape `embed_ollama` speaks, letting
/// `embed_fn` decide success or failure per call. Torn down when the
/// returned task handle is dropped (the test process exits before any
/// leaked listener matters).
async fn spawn_mock_embed_server(embed_fn: EmbedFn) -> String {
    async fn handle(State(embed_fn): State<EmbedFn>, Json(body): Json<serde_json::Value>) -> Response {
        let texts: Vec<String> = body["input"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        match embed_fn(&texts) {
            Ok(vectors) => Json(serde_json::json!({ "embeddings": vectors })).into_response(),
            Err(()) => (StatusCode::INTERNAL_SERVER_ERROR, "synthetic embedding failure").into_response(),
        }
    }

    let app = Router::new().route("/api/embed", post(handle)).with_state(embed_fn);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind mock embed server");
    let addr = listener.local_addr().expect("mock embed server local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{addr}")
}

// ============ Scenario: rename tolerance ============

#[tokio::test]
async fn rename_tolerates_and_restricts_query_by_new_name() {
    let (_tmp, gateway) = test_gateway().await;
    let doc = ingest_text(
        &gateway,
        "v1.txt",
        "Rust ownership rules prevent data races at compile time.",
    )
    .await;

    let before = gateway
        .query(QueryOptions {
            active_sources: Some(vec!["v1.txt".to_string()]),
            ..QueryOptions::from_config(gateway.config(), "what prevents data races".to_string())
        })
        .await
        .expect("query before rename succeeds");
    assert!(!before.citations.is_empty(), "expected citations before rename");

    let expected_version = doc.version_info.version;
    let renamed = gateway
        .rename_document(&doc.document_id, "v2.txt".to_string(), Some(expected_version))
        .expect("rename succeeds with the current version");
    assert_eq!(renamed.name, "v2.txt");
    assert_eq!(renamed.original_name, "v1.txt", "original_name is preserved across a rename");

    let after = gateway
        .query(QueryOptions {
            active_sources: Some(vec!["v2.txt".to_string()]),
            ..QueryOptions::from_config(gateway.config(), "what prevents data races".to_string())
        })
        .await
        .expect("query restricted to the new name succeeds");

    assert_eq!(
        after.citations.len(),
        before.citations.len(),
        "rename must not change what a restricted query finds"
    );
    assert_eq!(
        after.citations[0].source_name, "v1.txt",
        "chunks keep pointing at the name they were chunked under"
    );
}

// ============ Scenario: concurrent update-document race ============

#[tokio::test]
async fn concurrent_rename_yields_exactly_one_conflict_then_retry_succeeds() {
    let (_tmp, gateway) = test_gateway().await;
    let gateway = Arc::new(gateway);
    let doc = ingest_text(&gateway, "race.txt", "concurrent rename race fixture").await;
    let expected_version = doc.version_info.version;

    let g1 = gateway.clone();
    let g2 = gateway.clone();
    let id1 = doc.document_id.clone();
    let id2 = doc.document_id.clone();

    let (r1, r2) = tokio::join!(
        tokio::task::spawn_blocking(move || g1.rename_document(&id1, "race-a.txt".to_string(), Some(expected_version))),
        tokio::task::spawn_blocking(move || g2.rename_document(&id2, "race-b.txt".to_string(), Some(expected_version))),
    );
    let r1 = r1.expect("task 1 does not panic");
    let r2 = r2.expect("task 2 does not panic");

    let outcomes = [&r1, &r2];
    let ok_count = outcomes.iter().filter(|r| r.is_ok()).count();
    let conflict_count = outcomes
        .iter()
        .filter(|r| matches!(r, Err(RegistryError::Conflict { .. })))
        .count();
    assert_eq!(ok_count, 1, "exactly one concurrent rename should win: {r1:?} / {r2:?}");
    assert_eq!(conflict_count, 1, "the loser should observe a version conflict, not a silent failure");

    let current = gateway.get_document(&doc.document_id).expect("document still exists");
    let retried = gateway
        .rename_document(&doc.document_id, "race-final.txt".to_string(), Some(current.version_info.version))
        .expect("retry with the reloaded version succeeds");
    assert_eq!(retried.name, "race-final.txt");
}

// ============ Scenario: keyword/hybrid equivalence on an exact match ============

#[tokio::test]
async fn hybrid_and_keyword_modes_agree_on_exact_token_match() {
    const MARKER: &str = "ZQXFLARE77";
    let embed_fn: EmbedFn = Arc::new(|texts: &[String]| {
        Ok(texts
            .iter()
            .map(|t| if t.contains(MARKER) { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
            .collect())
    });
    let embed_url = spawn_mock_embed_server(embed_fn).await;
    let (_tmp, gateway) = test_gateway_with_embedding(&embed_url, 2).await;

    ingest_text(
        &gateway,
        "target.txt",
        &format!("The system encountered anomaly code {MARKER} during the overnight batch run."),
    )
    .await;
    ingest_text(
        &gateway,
        "distractor.txt",
        "The quarterly revenue report shows growth across all regions this year.",
    )
    .await;

    let keyword = gateway
        .query(QueryOptions {
            search_mode: SearchMode::Keyword,
            ..QueryOptions::from_config(gateway.config(), MARKER.to_string())
        })
        .await
        .expect("keyword query succeeds");
    assert!(!keyword.citations.is_empty(), "keyword search found no citations");
    assert!(
        keyword.citations[0].full_text.contains(MARKER),
        "keyword mode's top citation should contain the exact token: {:?}",
        keyword.citations[0]
    );

    let hybrid = gateway
        .query(QueryOptions {
            search_mode: SearchMode::Hybrid,
            semantic_weight: 0.3,
            ..QueryOptions::from_config(gateway.config(), MARKER.to_string())
        })
        .await
        .expect("hybrid query succeeds");
    assert!(!hybrid.citations.is_empty(), "hybrid search found no citations");
    assert!(
        hybrid.citations[0].full_text.contains(MARKER),
        "hybrid mode's top citation should agree with keyword mode on the exact match: {:?}",
        hybrid.citations[0]
    );
}

// ============ Scenario: partial ingest from persistent embedding failures ============

fn partial_ingest_source_text() -> String {
    // No sentence punctuation: the chunker treats this as one run-on
    // sentence exceeding `max_tokens`, forcing it through `split_words` and
    // guaranteeing more than one produced chunk. "ANCHORTOKEN" repeats every
    // 40 words, denser than the largest chunk gap pack_pieces can produce
    // (up to max_tokens=256 words), so every persisted chunk contains it
    // regardless of which chunks the embedding failure happens to drop.
    (0..1024)
        .map(|i| if i % 40 == 0 { "ANCHORTOKEN".to_string() } else { format!("filler{i}") })
        .collect::<Vec<_>>()
        .join(" ")
}

#[tokio::test]
async fn partial_ingest_from_persistent_embedding_failure_reports_honestly() {
    let remaining_failures = Arc::new(AtomicUsize::new(1));
    let embed_fn: EmbedFn = Arc::new(move |texts: &[String]| {
        let should_fail = remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| if n > 0 { Some(n - 1) } else { None })
            .is_ok();
        if should_fail {
            Err(())
        } else {
            Ok(texts.iter().map(|_| vec![0.1_f32; 4]).collect())
        }
    });
    let embed_url = spawn_mock_embed_server(embed_fn).await;
    let (_tmp, gateway) = test_gateway_with_embedding(&embed_url, 4).await;

    let document = ingest_text_with_strategy(
        &gateway,
        "partial.txt",
        &partial_ingest_source_text(),
        ChunkingStrategy::Precise,
    )
    .await;

    assert_eq!(document.status, DocumentStatus::Partial, "one persistently-failing batch should leave the document partial");
    assert!(document.chunks_created >= 1, "the batches that did succeed must still be persisted");
    assert_eq!(
        document.processing_metadata.failed_chunk_indices.len(),
        1,
        "exactly one batch was configured to fail"
    );
    assert!(document.error.is_some(), "a partial document must explain itself");

    let reloaded = gateway.get_document(&document.document_id).expect("document is registered");
    assert_eq!(reloaded.status, DocumentStatus::Partial);
    assert_eq!(reloaded.chunks_created, document.chunks_created);

    let answer = gateway
        .query(QueryOptions {
            search_mode: SearchMode::Keyword,
            ..QueryOptions::from_config(gateway.config(), "ANCHORTOKEN".to_string())
        })
        .await
        .expect("query over a partially-ingested document still succeeds");
    assert!(
        !answer.citations.is_empty(),
        "the surviving chunks are still searchable even though ingest was partial"
    );
}
