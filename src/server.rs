//! Gateway HTTP surface plus the MCP Streamable HTTP endpoint.
//!
//! The REST API and the MCP bridge share one [`Gateway`] instance. REST
//! binds to `[server].bind`; the MCP endpoint binds separately to
//! `[mcp].bind` when `[mcp].enabled` is set, so a deployment can put the
//! MCP surface behind a different network boundary than the REST API.
//!
//! # Error Contract
//!
//! Every handler returns [`RagError`], which renders as `{"detail": "..."}`
//! with the status code matching the error variant (see `error.rs`).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted, since MCP and browser-
//! based clients need cross-origin access to this API.

use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::StreamableHttpService;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::config::{Config, SearchMode};
use crate::error::{RagError, RagResult};
use crate::gateway::Gateway;
use crate::ingest::IngestOptions;
use crate::mcp::McpBridge;
use crate::models::Document;
use crate::progress::NoProgress;
use crate::retrieval::{Answer, QueryOptions};
use crate::traits::ToolRegistry;

#[derive(Clone)]
struct AppState {
    gateway: Arc<Gateway>,
}

/// Boot the Gateway, then serve the REST API (and, if enabled, the MCP
/// endpoint) until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let gateway = Arc::new(Gateway::open(config.clone()).await?);
    let bind_addr = config.server.bind.clone();

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .route("/documents", post(handle_ingest).get(handle_list_documents))
        .route(
            "/documents/{id}",
            get(handle_get_document).put(handle_rename_document).delete(handle_delete_document),
        )
        .route("/documents/{id}/pages/{page}", get(handle_get_page))
        .route("/documents/{id}/storage/status", get(handle_storage_status))
        .route("/query", post(handle_query))
        .route("/query/images", post(handle_query_images))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { gateway: gateway.clone() });

    if config.mcp.enabled {
        let mcp_bind = config.mcp.bind.clone();
        let mcp_gateway = gateway.clone();
        tokio::spawn(async move {
            if let Err(e) = run_mcp_server(mcp_gateway, &mcp_bind).await {
                tracing::error!(error = %e, "mcp server exited");
            }
        });
    }

    tracing::info!(%bind_addr, "gateway listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn run_mcp_server(gateway: Arc<Gateway>, bind_addr: &str) -> anyhow::Result<()> {
    let tools = Arc::new(ToolRegistry::with_builtins());
    let service = StreamableHttpService::new(
        move || Ok(McpBridge::new(gateway.clone(), tools.clone())),
        LocalSessionManager::default().into(),
        Default::default(),
    );
    let app = Router::new().nest_service("/mcp", service);

    tracing::info!(%bind_addr, "mcp endpoint listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ── POST /documents ──────────────────────────────────────────────────────

async fn handle_ingest(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> RagResult<Json<Document>> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;
    let mut content_type = "application/octet-stream".to_string();
    let mut parser_preference: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| RagError::BadRequest(format!("invalid multipart body: {}", e)))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                file_name = field.file_name().map(str::to_string);
                if let Some(ct) = field.content_type() {
                    content_type = ct.to_string();
                }
                file_bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| RagError::BadRequest(format!("reading upload: {}", e)))?
                        .to_vec(),
                );
            }
            "parser_preference" => {
                let text = field.text().await.unwrap_or_default();
                if !text.trim().is_empty() {
                    parser_preference = Some(text);
                }
            }
            _ => {}
        }
    }

    let bytes = file_bytes.ok_or_else(|| RagError::BadRequest("missing 'file' field".to_string()))?;
    let source_name = file_name.unwrap_or_else(|| "upload".to_string());

    let document = state
        .gateway
        .ingest_document(
            &content_type,
            &bytes,
            &source_name,
            IngestOptions {
                parser_preference,
                chunking_strategy: None,
            },
            &NoProgress,
        )
        .await?;

    Ok(Json(document))
}

// ── GET /documents ────────────────────────────────────────────────────────

async fn handle_list_documents(State(state): State<AppState>) -> Json<Vec<Document>> {
    Json(state.gateway.list_documents())
}

// ── GET /documents/{id} ──────────────────────────────────────────────────

async fn handle_get_document(State(state): State<AppState>, Path(id): Path<String>) -> RagResult<Json<Document>> {
    state
        .gateway
        .get_document(&id)
        .map(Json)
        .map_err(|e| RagError::NotFound(e.to_string()))
}

// ── PUT /documents/{id} ───────────────────────────────────────────────────

#[derive(Deserialize)]
struct RenameRequest {
    name: String,
    #[serde(default)]
    expected_version: Option<u64>,
}

async fn handle_rename_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RenameRequest>,
) -> RagResult<Json<Document>> {
    if req.name.trim().is_empty() {
        return Err(RagError::BadRequest("name must not be empty".to_string()));
    }
    state
        .gateway
        .rename_document(&id, req.name, req.expected_version)
        .map(Json)
        .map_err(registry_error)
}

// ── DELETE /documents/{id} ────────────────────────────────────────────────

async fn handle_delete_document(State(state): State<AppState>, Path(id): Path<String>) -> RagResult<Json<DeletedBody>> {
    state.gateway.delete_document(&id).await.map_err(registry_error)?;
    Ok(Json(DeletedBody { deleted: id }))
}

#[derive(Serialize)]
struct DeletedBody {
    deleted: String,
}

fn registry_error(e: crate::registry::RegistryError) -> RagError {
    use crate::registry::RegistryError;
    match e {
        RegistryError::NotFound(id) => RagError::NotFound(id),
        RegistryError::Conflict { expected, actual } => {
            RagError::Conflict(format!("expected version {}, found {}", expected, actual))
        }
        RegistryError::Io(err) => RagError::Internal(err),
    }
}

// ── GET /documents/{id}/pages/{page} ─────────────────────────────────────

async fn handle_get_page(
    State(state): State<AppState>,
    Path((id, page)): Path<(String, u32)>,
) -> RagResult<Json<crate::gateway::PageContent>> {
    Ok(Json(state.gateway.get_page(&id, page).await?))
}

// ── GET /documents/{id}/storage/status ───────────────────────────────────

async fn handle_storage_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> RagResult<Json<crate::gateway::StorageStatus>> {
    Ok(Json(state.gateway.storage_status(&id).await?))
}

// ── POST /query, POST /query/images ──────────────────────────────────────

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    #[serde(default)]
    k: Option<usize>,
    #[serde(default)]
    search_mode: Option<SearchMode>,
    #[serde(default)]
    use_mmr: Option<bool>,
    #[serde(default)]
    use_rerank: Option<bool>,
    #[serde(default)]
    use_agentic_rag: Option<bool>,
    #[serde(default)]
    document_id: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    active_sources: Option<Vec<String>>,
}

impl QueryRequest {
    fn into_options(self, config: &Config, include_images: bool) -> RagResult<QueryOptions> {
        if self.question.trim().is_empty() {
            return Err(RagError::BadRequest("question must not be empty".to_string()));
        }
        let mut options = QueryOptions::from_config(config, self.question);
        if let Some(k) = self.k {
            options.k = k;
        }
        if let Some(mode) = self.search_mode {
            options.search_mode = mode;
        }
        if let Some(v) = self.use_mmr {
            options.use_mmr = v;
        }
        if let Some(v) = self.use_rerank {
            options.use_rerank = v;
        }
        if let Some(v) = self.use_agentic_rag {
            options.use_agentic_rag = v;
        }
        options.document_id = self.document_id;
        options.active_sources = match (self.active_sources, self.source) {
            (Some(sources), _) => Some(sources),
            (None, Some(source)) => Some(vec![source]),
            (None, None) => None,
        };
        options.include_images = include_images;
        Ok(options)
    }
}

async fn handle_query(State(state): State<AppState>, Json(req): Json<QueryRequest>) -> RagResult<Json<Answer>> {
    let options = req.into_options(state.gateway.config(), false)?;
    Ok(Json(state.gateway.query(options).await?))
}

async fn handle_query_images(State(state): State<AppState>, Json(req): Json<QueryRequest>) -> RagResult<Json<Answer>> {
    let options = req.into_options(state.gateway.config(), true)?;
    Ok(Json(state.gateway.query(options).await?))
}

// ── GET /health ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    registry_version: u64,
    document_count: usize,
}

async fn handle_health(State(state): State<AppState>) -> RagResult<Json<HealthResponse>> {
    let sync = state.gateway.sync_status()?;
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        registry_version: sync.version,
        document_count: sync.document_count,
    }))
}

