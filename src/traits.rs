//! MCP tool trait and built-in tool implementations.
//!
//! [`Tool`] is the seam between the MCP JSON-RPC bridge ([`crate::mcp`]) and
//! the [`Gateway`](crate::gateway::Gateway): every tool takes a JSON object
//! of parameters and a [`ToolContext`] and returns a JSON value. The seven
//! built-in tools below cover the Gateway's full read/write surface; a
//! deployment that wants to expose more can implement `Tool` itself and
//! register it alongside the built-ins.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::SearchMode;
use crate::gateway::Gateway;
use crate::ingest::IngestOptions;
use crate::retrieval::QueryOptions;

/// A tool agents can discover and call over MCP.
///
/// # Lifecycle
///
/// 1. Registered at server startup via [`ToolRegistry::register`].
/// 2. [`name`](Tool::name), [`description`](Tool::description), and
///    [`parameters_schema`](Tool::parameters_schema) back the MCP
///    `tools/list` response.
/// 3. [`execute`](Tool::execute) runs on each `tools/call` invocation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase, underscore-separated identifier; doubles as the MCP tool name.
    fn name(&self) -> &str;

    /// One-line description surfaced to agents deciding whether to call this tool.
    fn description(&self) -> &str;

    /// Whether this is one of the seven built-in Gateway-backed tools.
    fn is_builtin(&self) -> bool {
        true
    }

    /// JSON Schema for the tool's parameters (`type: "object"` with `properties`).
    fn parameters_schema(&self) -> Value;

    /// Run the tool. `params` is always a JSON object, already matching
    /// [`parameters_schema`](Tool::parameters_schema) loosely — tools still
    /// validate required fields themselves and return an error for
    /// malformed input rather than panicking.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Bridge from a tool invocation to the Gateway. One instance is created per
/// call; cheap to construct since it only clones an `Arc`.
pub struct ToolContext {
    gateway: Arc<Gateway>,
}

impl ToolContext {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }
}

fn require_str<'a>(params: &'a Value, field: &str) -> Result<&'a str> {
    params
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .with_context(|| format!("missing or empty required field '{}'", field))
}

/// `search_knowledge_base`: run the Retrieval Worker over ingested documents.
pub struct SearchKnowledgeBaseTool;

#[async_trait]
impl Tool for SearchKnowledgeBaseTool {
    fn name(&self) -> &str {
        "search_knowledge_base"
    }

    fn description(&self) -> &str {
        "Search ingested documents and generate a grounded, citation-backed answer"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string", "description": "Natural-language question" },
                "k": { "type": "integer", "description": "Number of chunks to retrieve", "default": 6 },
                "search_mode": { "type": "string", "enum": ["semantic", "keyword", "hybrid"], "default": "hybrid" },
                "document_id": { "type": "string", "description": "Restrict to a single document" },
                "active_sources": { "type": "array", "items": { "type": "string" }, "description": "Restrict to these source names" },
                "include_images": { "type": "boolean", "description": "Force image retrieval", "default": false }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let question = require_str(&params, "question")?.to_string();
        let mut options = QueryOptions::from_config(ctx.gateway().config(), question);

        if let Some(k) = params.get("k").and_then(|v| v.as_u64()) {
            options.k = k as usize;
        }
        if let Some(mode) = params.get("search_mode").and_then(|v| v.as_str()) {
            options.search_mode = match mode {
                "semantic" => SearchMode::Semantic,
                "keyword" => SearchMode::Keyword,
                _ => SearchMode::Hybrid,
            };
        }
        if let Some(id) = params.get("document_id").and_then(|v| v.as_str()) {
            options.document_id = Some(id.to_string());
        }
        if let Some(sources) = params.get("active_sources").and_then(|v| v.as_array()) {
            options.active_sources = Some(
                sources
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            );
        }
        if let Some(include_images) = params.get("include_images").and_then(|v| v.as_bool()) {
            options.include_images = include_images;
        }

        let answer = ctx.gateway().query(options).await?;
        Ok(serde_json::to_value(&answer)?)
    }
}

/// `ingest_document`: hand new bytes to the Ingestion Worker.
pub struct IngestDocumentTool;

#[async_trait]
impl Tool for IngestDocumentTool {
    fn name(&self) -> &str {
        "ingest_document"
    }

    fn description(&self) -> &str {
        "Ingest a new document (base64-encoded bytes) into the knowledge base"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source_name": { "type": "string", "description": "Original filename" },
                "content_type": { "type": "string", "description": "MIME type, e.g. application/pdf" },
                "content_base64": { "type": "string", "description": "Base64-encoded document bytes" },
                "parser_preference": { "type": "string", "enum": ["fast", "ocr", "image_model"], "description": "Disable fallback and force one parser" }
            },
            "required": ["source_name", "content_type", "content_base64"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        use base64::Engine;

        let source_name = require_str(&params, "source_name")?;
        let content_type = require_str(&params, "content_type")?;
        let content_b64 = require_str(&params, "content_base64")?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(content_b64)
            .context("content_base64 is not valid base64")?;

        let options = IngestOptions {
            parser_preference: params
                .get("parser_preference")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            chunking_strategy: None,
        };

        let document = ctx
            .gateway()
            .ingest_document(
                content_type,
                &bytes,
                source_name,
                options,
                &crate::progress::NoProgress,
            )
            .await?;
        Ok(serde_json::to_value(&document)?)
    }
}

/// `list_documents`: enumerate everything in the registry.
pub struct ListDocumentsTool;

#[async_trait]
impl Tool for ListDocumentsTool {
    fn name(&self) -> &str {
        "list_documents"
    }

    fn description(&self) -> &str {
        "List all documents known to the registry"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let documents = ctx.gateway().list_documents();
        Ok(json!({ "documents": documents, "total": documents.len() }))
    }
}

/// `get_document_status`: one document's registry record, including status/error.
pub struct GetDocumentStatusTool;

#[async_trait]
impl Tool for GetDocumentStatusTool {
    fn name(&self) -> &str {
        "get_document_status"
    }

    fn description(&self) -> &str {
        "Get the ingest status, chunk/image counts, and error (if any) for one document"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "document_id": { "type": "string" } },
            "required": ["document_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let document_id = require_str(&params, "document_id")?;
        let document = ctx
            .gateway()
            .get_document(document_id)
            .map_err(|e| anyhow::anyhow!("looking up document: {}", e))?;
        Ok(serde_json::to_value(&document)?)
    }
}

/// `delete_document`: cascade-delete a document from both streams and the registry.
pub struct DeleteDocumentTool;

#[async_trait]
impl Tool for DeleteDocumentTool {
    fn name(&self) -> &str {
        "delete_document"
    }

    fn description(&self) -> &str {
        "Delete a document and its indexed chunks/images"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "document_id": { "type": "string" } },
            "required": ["document_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let document_id = require_str(&params, "document_id")?;
        ctx.gateway()
            .delete_document(document_id)
            .await
            .map_err(|e| anyhow::anyhow!("deleting document: {}", e))?;
        Ok(json!({ "deleted": document_id }))
    }
}

/// `manage_index`: re-run image extraction/OCR for a document, or report
/// whether its index rows actually exist.
pub struct ManageIndexTool;

#[async_trait]
impl Tool for ManageIndexTool {
    fn name(&self) -> &str {
        "manage_index"
    }

    fn description(&self) -> &str {
        "Reindex a document's images, or inspect whether its index rows exist"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "document_id": { "type": "string" },
                "content_type": { "type": "string", "description": "Required for the reindex_images action" },
                "action": { "type": "string", "enum": ["reindex_images", "status"], "default": "status" }
            },
            "required": ["document_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let document_id = require_str(&params, "document_id")?;
        let action = params.get("action").and_then(|v| v.as_str()).unwrap_or("status");

        match action {
            "reindex_images" => {
                let content_type = require_str(&params, "content_type")?;
                let document = ctx.gateway().reingest_images(content_type, document_id).await?;
                Ok(serde_json::to_value(&document)?)
            }
            _ => {
                let status = ctx.gateway().storage_status(document_id).await?;
                Ok(serde_json::to_value(&status)?)
            }
        }
    }
}

/// `get_system_stats`: registry and store counts.
pub struct GetSystemStatsTool;

#[async_trait]
impl Tool for GetSystemStatsTool {
    fn name(&self) -> &str {
        "get_system_stats"
    }

    fn description(&self) -> &str {
        "Document, chunk, and image counts across the registry and both index streams"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let stats = crate::stats::collect_stats(ctx.gateway().config()).await?;
        Ok(serde_json::to_value(&stats)?)
    }
}

/// Registry of tools exposed over MCP.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// The seven Gateway-backed tools exposed over MCP.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchKnowledgeBaseTool));
        registry.register(Box::new(IngestDocumentTool));
        registry.register(Box::new(ListDocumentsTool));
        registry.register(Box::new(GetDocumentStatusTool));
        registry.register(Box::new(DeleteDocumentTool));
        registry.register(Box::new(ManageIndexTool));
        registry.register(Box::new(GetSystemStatsTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
