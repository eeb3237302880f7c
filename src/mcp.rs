//! MCP JSON-RPC bridge: exposes the [`ToolRegistry`]'s seven Gateway-backed
//! tools as a standard MCP Streamable HTTP endpoint.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler};

use crate::traits::{Tool, ToolContext, ToolRegistry};

/// Bridges [`ToolRegistry`] to the MCP protocol. Cloned per session; cheap
/// since both fields are `Arc`.
#[derive(Clone)]
pub struct McpBridge {
    gateway: Arc<crate::gateway::Gateway>,
    tools: Arc<ToolRegistry>,
}

impl McpBridge {
    pub fn new(gateway: Arc<crate::gateway::Gateway>, tools: Arc<ToolRegistry>) -> Self {
        Self { gateway, tools }
    }

    fn to_mcp_tool(tool: &dyn Tool) -> rmcp::model::Tool {
        let schema_value = tool.parameters_schema();
        let input_schema: Arc<serde_json::Map<String, serde_json::Value>> = match schema_value {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::new()),
        };

        rmcp::model::Tool {
            name: Cow::Owned(tool.name().to_string()),
            title: None,
            description: Some(Cow::Owned(tool.description().to_string())),
            input_schema,
            output_schema: None,
            annotations: None,
            execution: None,
            icons: None,
            meta: None,
        }
    }
}

impl ServerHandler for McpBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "ragctl".to_string(),
                title: Some("ragctl".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "ragctl — retrieval-augmented question answering over ingested documents. \
                 Use search_knowledge_base to ask questions, ingest_document to add new \
                 material, and get_document_status / list_documents / get_system_stats to \
                 inspect ingest state."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools: Vec<rmcp::model::Tool> =
            self.tools.tools().iter().map(|t| Self::to_mcp_tool(t.as_ref())).collect();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn get_tool(&self, name: &str) -> Option<rmcp::model::Tool> {
        self.tools.find(name).map(Self::to_mcp_tool)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let tool = self.tools.find(&request.name).ok_or_else(|| {
            McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", request.name),
                None,
            )
        })?;

        let params = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        let ctx = ToolContext::new(self.gateway.clone());
        match tool.execute(params, &ctx).await {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }
}
