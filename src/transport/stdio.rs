//! Stdio adapter (spec §6 "Stdio surface"): each registered, enabled tool
//! appears as a named MCP callable with input schema
//! `{target, extra_args?, timeout_sec?}`.
//!
//! The tool set is rebuilt from scratch on every `list_tools` call rather
//! than diffed incrementally — "clear-then-register" — so enabling or
//! disabling a tool re-syncs the callable set on the very next listing,
//! per the deferred-monitoring/clear-then-register behavior mandated in
//! spec §9's open questions.

use crate::orchestrator::Pipeline;
use crate::types::ExecuteRequest;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, ListToolsResult, PaginatedRequestParam,
    ServerCapabilities, ServerInfo,
};
use rmcp::service::RequestContext;
use rmcp::{transport::stdio, ErrorData as McpError, RoleServer, ServerHandler, ServiceExt};
use std::borrow::Cow;
use std::sync::Arc;

#[derive(Clone)]
pub struct McpServer {
    pipeline: Arc<Pipeline>,
}

impl McpServer {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    fn tool_schema() -> serde_json::Map<String, serde_json::Value> {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "target": { "type": "string" },
                "extra_args": { "type": "string" },
                "timeout_sec": { "type": "number" }
            },
            "required": ["target"]
        });
        match schema {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }
}

impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Executes allow-listed network scanning tools against private-range targets."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        // Clear-then-register: build the list fresh from the registry's
        // current enabled set every call, rather than patching a cached set.
        let tools = self
            .pipeline
            .list_tools()
            .into_iter()
            .filter(|t| t.enabled)
            .map(|t| rmcp::model::Tool {
                name: Cow::Owned(t.name),
                description: Some(Cow::Owned(t.description)),
                input_schema: Arc::new(Self::tool_schema()),
                annotations: None,
            })
            .collect();

        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let name = request.name.to_string();
        if !self.pipeline.registry().contains(&name) {
            return Err(McpError::invalid_params(
                format!("unknown tool: {name}"),
                None,
            ));
        }
        if !self.pipeline.registry().is_enabled(&name) {
            return Err(McpError::invalid_params(
                format!("tool is disabled: {name}"),
                None,
            ));
        }

        let args = request.arguments.unwrap_or_default();
        let req: ExecuteRequest = serde_json::from_value(serde_json::Value::Object(args))
            .map_err(|e| McpError::invalid_params(format!("invalid arguments: {e}"), None))?;

        let result = self.pipeline.execute(&name, req).await;
        let text = serde_json::to_string(&result)
            .unwrap_or_else(|_| "{\"error\":\"failed to serialize result\"}".to_string());

        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

/// Starts the stdio MCP server and blocks until the transport closes.
/// Logging must write to stderr — stdout carries the MCP wire protocol.
pub async fn serve(pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    let server = McpServer::new(pipeline);
    let service = server.serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
