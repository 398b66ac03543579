use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    schemars, tool, tool_handler, tool_router,
};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::AppConfig;
use crate::engine::SearchEngine;
use crate::error::BridgeError;
use crate::naming::pascal_case;
use crate::registry::ToolRegistry;
use crate::request::RequestBuilder;

// --- Parameter structs for each meta-tool ---

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchToolsParams {
    /// Search query. An empty query lists up to 100 tools.
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct LoadToolParams {
    /// Identifier of the tool to load.
    #[serde(rename = "toolId")]
    pub tool_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct InvokeToolParams {
    /// Identifier of a previously loaded tool.
    #[serde(rename = "toolId")]
    pub tool_id: String,
    /// Arguments matching the tool's input schema.
    #[serde(default)]
    pub arguments: Option<Map<String, Value>>,
}

/// The MCP server exposing the three meta-tools over stdio.
#[derive(Clone)]
pub struct BridgeServer {
    registry: Arc<ToolRegistry>,
    engine: Arc<dyn SearchEngine>,
    app_name: String,
    app: Arc<AppConfig>,
    requests: Arc<RequestBuilder>,
    tool_router: ToolRouter<Self>,
}

impl BridgeServer {
    pub fn new(
        app_name: String,
        app: Arc<AppConfig>,
        registry: Arc<ToolRegistry>,
        engine: Arc<dyn SearchEngine>,
        requests: Arc<RequestBuilder>,
    ) -> Self {
        Self {
            registry,
            engine,
            app_name,
            app,
            requests,
            tool_router: Self::tool_router(),
        }
    }

    /// Agent-visible failures become is-error results; the rest surface to
    /// the host as protocol errors.
    fn to_result(outcome: Result<String, BridgeError>) -> Result<CallToolResult, McpError> {
        match outcome {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Err(e) if e.is_agent_visible() => {
                Ok(CallToolResult::error(vec![Content::text(e.to_string())]))
            }
            Err(e) => Err(McpError::internal_error(e.to_string(), None)),
        }
    }
}

#[tool_router]
impl BridgeServer {
    #[tool(
        name = "SearchTools",
        description = "Search the tool catalog. Supports keywords, \"phrases\", AND/OR/NOT, trailing-* prefix terms, column filters (id: name: description: method: path: tags:), and predicate expressions such as MethodIs(\"GET\") when the predicate engine is active. An empty query lists up to 100 tools."
    )]
    async fn search_tools(
        &self,
        Parameters(params): Parameters<SearchToolsParams>,
    ) -> Result<CallToolResult, McpError> {
        let query = params.query.unwrap_or_default();
        Self::to_result(crate::tools::search::handle_search(self.engine.as_ref(), &query).await)
    }

    #[tool(
        name = "LoadTool",
        description = "Load a tool definition by id and render its input schema. Tools must be loaded before InvokeTool will accept them."
    )]
    async fn load_tool(
        &self,
        Parameters(params): Parameters<LoadToolParams>,
    ) -> Result<CallToolResult, McpError> {
        Self::to_result(crate::tools::load::handle_load(
            &self.registry,
            &params.tool_id,
        ))
    }

    #[tool(
        name = "InvokeTool",
        description = "Invoke a previously loaded tool against the configured upstream service, using the app's active profile for base URL, auth, and headers."
    )]
    async fn invoke_tool(
        &self,
        Parameters(params): Parameters<InvokeToolParams>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = crate::tools::invoke::handle_invoke(
            &self.registry,
            &self.app,
            &self.requests,
            &params.tool_id,
            params.arguments,
        )
        .await;

        match outcome {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            // The upstream body is still returned to the agent.
            Err(BridgeError::UpstreamHttp { status, body }) => Ok(CallToolResult::error(vec![
                Content::text(format!("upstream returned HTTP {status}\n{body}")),
            ])),
            Err(e) if e.is_agent_visible() => {
                Ok(CallToolResult::error(vec![Content::text(e.to_string())]))
            }
            Err(e) => Err(McpError::internal_error(e.to_string(), None)),
        }
    }
}

#[tool_handler]
impl ServerHandler for BridgeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(format!(
                "openbridge serves the {app} API as a progressively disclosed tool catalog \
                 backed by the {engine} search engine.\n\n\
                 Workflow:\n\
                 1. SearchTools(query) to find candidate operations\n\
                 2. LoadTool(toolId) to inspect an input schema\n\
                 3. InvokeTool(toolId, arguments) to call the operation\n\n\
                 A tool must be loaded before it can be invoked.",
                app = pascal_case(&self.app_name),
                engine = self.engine.name(),
            )),
        }
    }
}
