//! Live sessions to tool endpoints.
//!
//! The manager only sees [`ToolTransport`] and [`ToolSession`]; the `rmcp` implementation
//! below is what the binary uses.

use std::{ops::Deref, str::FromStr, sync::Arc};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::{
    RoleClient, ServiceExt,
    model::CallToolRequestParam,
    service::RunningService,
    transport::{StreamableHttpClientTransport, TokioChildProcess, streamable_http_client::StreamableHttpClientTransportConfig},
};
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::instrument;

use crate::base::types::{Res, Void};

use super::{McpServer, McpServerConfig};

// Types.

/// A tool as advertised by its endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// What a tool call returned.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

// Traits.

/// Opens sessions to tool endpoints.
#[async_trait]
pub trait ToolTransport: Send + Sync + 'static {
    /// Establish a session with the endpoint described by `server`.
    async fn connect(&self, server: &McpServer) -> Res<Arc<dyn ToolSession>>;
}

/// One open session to a tool endpoint.
#[async_trait]
pub trait ToolSession: Send + Sync + 'static {
    /// Live round trip for the endpoint's tool catalog.
    async fn list_tools(&self) -> Res<Vec<RemoteTool>>;

    /// Invoke a tool by its local (unqualified) name.
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Res<ToolOutput>;

    /// Cheap liveness check.
    async fn ping(&self) -> Void;
}

// Structs.

/// Tool transport for the application.
///
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct ToolTransportClient {
    inner: Arc<dyn ToolTransport>,
}

impl Deref for ToolTransportClient {
    type Target = dyn ToolTransport;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl ToolTransportClient {
    pub fn new(inner: Arc<dyn ToolTransport>) -> Self {
        Self { inner }
    }

    /// The `rmcp`-backed transport.
    pub fn rmcp() -> Self {
        Self { inner: Arc::new(RmcpTransport) }
    }
}

// Specific implementations.

/// Transport over `rmcp`, supporting child-process and streamable-HTTP endpoints.
pub struct RmcpTransport;

#[async_trait]
impl ToolTransport for RmcpTransport {
    #[instrument(name = "RmcpTransport::connect", skip_all, fields(server = %server.name))]
    async fn connect(&self, server: &McpServer) -> Res<Arc<dyn ToolSession>> {
        let client = get_mcp_server_client(server).await?;

        Ok(Arc::new(client))
    }
}

#[async_trait]
impl ToolSession for RunningService<RoleClient, ()> {
    async fn list_tools(&self) -> Res<Vec<RemoteTool>> {
        let tools = self.list_all_tools().await?;

        tools.iter().map(|tool| remote_tool_from_value(serde_json::to_value(tool)?)).collect()
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Res<ToolOutput> {
        let request = CallToolRequestParam {
            name: name.to_string().into(),
            arguments: Some(arguments),
        };

        let result = self.peer().call_tool(request).await?;

        Ok(tool_output_from_value(&serde_json::to_value(&result)?))
    }

    async fn ping(&self) -> Void {
        self.peer().list_tools(Default::default()).await?;

        Ok(())
    }
}

// Helpers.

/// Given an [`McpServer`], open a running client session.
pub async fn get_mcp_server_client(server: &McpServer) -> Res<RunningService<RoleClient, ()>> {
    match &server.config {
        McpServerConfig::Local { command, args, envs } => {
            let mut command = Command::new(command);

            command.args(args);

            if let Some(envs) = envs {
                for (key, value) in envs {
                    command.env(key, value);
                }
            }

            let transport = TokioChildProcess::new(command)?;

            Ok(().serve(transport).await?)
        }
        McpServerConfig::Remote { url, headers } => {
            // Compute headers.
            let mut header_map = HeaderMap::new();
            if let Some(headers_vec) = headers {
                for (key, value) in headers_vec {
                    header_map.insert(HeaderName::from_str(key)?, HeaderValue::from_str(value)?);
                }
            }

            // Build client.
            let client = reqwest::Client::builder().default_headers(header_map).build()?;

            // Build config.
            let config = StreamableHttpClientTransportConfig::with_uri(url.as_str());

            // Build the transport.
            let transport = StreamableHttpClientTransport::with_client(client, config);

            Ok(().serve(transport).await?)
        }
    }
}

/// Read a tool out of its MCP wire form (`name`, `description`, `inputSchema`).
pub fn remote_tool_from_value(value: Value) -> Res<RemoteTool> {
    let name = value.get("name").and_then(Value::as_str).ok_or_else(|| anyhow::anyhow!("Tool without a name: {value}"))?;

    Ok(RemoteTool {
        name: name.to_string(),
        description: value.get("description").and_then(Value::as_str).unwrap_or_default().to_string(),
        input_schema: value.get("inputSchema").cloned().unwrap_or_else(|| serde_json::json!({ "type": "object" })),
    })
}

/// Flatten an MCP call result into text.  Text blocks are joined by newlines; other
/// blocks are kept as JSON.
pub fn tool_output_from_value(value: &Value) -> ToolOutput {
    let content = value
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .map(|block| block.get("text").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| block.to_string()))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    ToolOutput {
        content,
        is_error: value.get("isError").and_then(Value::as_bool).unwrap_or(false),
    }
}

// Tests.
