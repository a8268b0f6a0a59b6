//! Client bridge to Model Context Protocol servers.
//!
//! Each configured server is started (stdio) or reached (HTTP), initialized,
//! and asked for its tools. Every tool it offers is registered in the
//! [`ToolRegistry`] as `{server}__{tool}` so devices call it like any
//! local tool. A server that fails to come up is logged and skipped.

mod config;
mod http;
mod stdio;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{Result, RpcError};
use crate::message::ToolResult;
use crate::tools::{parse_input, Tool, ToolDefinition, ToolRegistry};

pub use config::{McpServerConfig, McpServersConfig, TOOL_SEPARATOR};
pub use http::HttpTransport;
pub use stdio::StdioTransport;

/// Protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Per-request budget for servers that never answer.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A JSON-RPC 2.0 message as exchanged with MCP servers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcMessage {
    pub fn request(id: u64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(id)),
            method: Some(method.to_string()),
            params: Some(params),
            ..Self::default()
        }
    }

    pub fn notification(method: &str) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: Some(method.to_string()),
            ..Self::default()
        }
    }

    /// Answer to a server-initiated request this client does not support.
    pub fn method_not_found(id: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            error: Some(JsonRpcError {
                code: -32601,
                message: "Method not found".to_string(),
                data: None,
            }),
            ..Self::default()
        }
    }

    /// True for a reply (result or error) rather than a request or notification.
    pub fn is_response(&self) -> bool {
        self.method.is_none() && self.id.is_some()
    }
}

/// Moves JSON-RPC messages to one server and back.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send `message` and wait for the response carrying the same id.
    async fn request(&self, message: &JsonRpcMessage) -> Result<JsonRpcMessage>;

    /// Send a message that expects no response.
    async fn notify(&self, message: &JsonRpcMessage) -> Result<()>;

    /// Release the connection or child process.
    async fn close(&self);
}

/// A tool as advertised by `tools/list`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolsPage {
    #[serde(default)]
    tools: Vec<McpToolInfo>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallToolResult {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    is_error: bool,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    data: Option<String>,
}

impl CallToolResult {
    fn into_tool_result(self) -> ToolResult {
        let output = self
            .content
            .into_iter()
            .filter_map(|block| match (block.text, block.data) {
                (Some(text), _) => Some(text),
                (None, Some(data)) => Some(format!("[binary: {} bytes]", data.len())),
                (None, None) => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        ToolResult {
            output,
            is_error: self.is_error,
        }
    }
}

/// An initialized session with one MCP server.
pub struct McpClient {
    server: String,
    transport: Box<dyn McpTransport>,
    next_id: AtomicU64,
}

impl McpClient {
    /// Start or reach the server described by `config` and run the handshake.
    pub async fn connect(server: &str, config: &McpServerConfig, timeout: Duration) -> Result<Self> {
        let transport: Box<dyn McpTransport> = match config {
            McpServerConfig::Stdio { command, args, env } => {
                Box::new(StdioTransport::spawn(server, command, args, env, timeout)?)
            }
            McpServerConfig::Http { url } => Box::new(HttpTransport::new(server, url, timeout)?),
        };
        Self::initialize(server, transport).await
    }

    /// Run the handshake over an already open transport.
    pub async fn initialize(server: &str, transport: Box<dyn McpTransport>) -> Result<Self> {
        let client = Self {
            server: server.to_string(),
            transport,
            next_id: AtomicU64::new(1),
        };
        let init = client
            .call(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {"name": "agentwire", "version": env!("CARGO_PKG_VERSION")}
                }),
            )
            .await;
        if let Err(err) = init {
            client.transport.close().await;
            return Err(err);
        }
        client
            .transport
            .notify(&JsonRpcMessage::notification("notifications/initialized"))
            .await?;
        debug!(server, "MCP session initialized");
        Ok(client)
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Send one request and return its `result`.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let reply = self
            .transport
            .request(&JsonRpcMessage::request(id, method, params))
            .await?;
        if let Some(error) = reply.error {
            return Err(self.error(format!("{method} failed ({}): {}", error.code, error.message)));
        }
        Ok(reply.result.unwrap_or(Value::Null))
    }

    /// Every tool the server offers, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(cursor) => json!({"cursor": cursor}),
                None => json!({}),
            };
            let page: ToolsPage = serde_json::from_value(self.call("tools/list", params).await?)
                .map_err(|err| self.error(format!("bad tools/list result: {err}")))?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                    cursor = Some(next)
                }
                _ => return Ok(tools),
            }
        }
    }

    /// Invoke a tool by its server-side name.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<ToolResult> {
        let result = self
            .call("tools/call", json!({"name": tool, "arguments": arguments}))
            .await?;
        let result: CallToolResult = serde_json::from_value(result)
            .map_err(|err| self.error(format!("bad tools/call result: {err}")))?;
        Ok(result.into_tool_result())
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }

    fn error(&self, message: String) -> RpcError {
        RpcError::Mcp {
            server: self.server.clone(),
            message,
        }
    }
}

/// One remote tool exposed through the registry under its namespaced name.
pub struct McpTool {
    name: String,
    remote_name: String,
    description: String,
    input_schema: Option<Value>,
    client: Arc<McpClient>,
}

impl McpTool {
    pub fn new(client: Arc<McpClient>, info: McpToolInfo) -> Self {
        let name = format!("{}{TOOL_SEPARATOR}{}", client.server(), info.name);
        let description = info
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("MCP tool from {}", client.server()));
        Self {
            name,
            remote_name: info.name,
            description,
            input_schema: info.input_schema,
            client,
        }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Option<Value> {
        self.input_schema.clone()
    }

    async fn execute(&self, input: Value) -> Result<ToolResult> {
        self.client.call_tool(&self.remote_name, input).await
    }
}

/// Input of the `mcp_call` action.
#[derive(Deserialize)]
struct McpCallInput {
    tool: String,
    #[serde(default = "empty_object")]
    arguments: Value,
}

fn empty_object() -> Value {
    json!({})
}

fn list_result(definitions: &[ToolDefinition]) -> ToolResult {
    let body = json!({"count": definitions.len(), "tools": definitions});
    ToolResult::ok(body.to_string())
}

async fn call_bridged(tools: &[Arc<McpTool>], input: Value) -> ToolResult {
    let McpCallInput { tool, arguments } = match parse_input(MCP_CALL, input) {
        Ok(input) => input,
        Err(err) => return err.into(),
    };
    let Some(target) = tools.iter().find(|t| t.name() == tool) else {
        return ToolResult::error(format!("Unknown MCP tool: {tool}"));
    };
    match target.execute(arguments).await {
        Ok(result) => result,
        Err(err) => err.into(),
    }
}

pub const MCP_CALL: &str = "mcp_call";
pub const MCP_LIST_TOOLS: &str = "mcp_list_tools";

/// Calls any bridged tool by name.
struct McpCallTool {
    tools: Vec<Arc<McpTool>>,
}

#[async_trait]
impl Tool for McpCallTool {
    fn name(&self) -> &str {
        MCP_CALL
    }

    fn description(&self) -> &str {
        "Call a tool on a connected MCP server"
    }

    fn input_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "tool": {"type": "string", "description": "Namespaced tool name, server__tool"},
                "arguments": {"type": "object"}
            },
            "required": ["tool"]
        }))
    }

    async fn execute(&self, input: Value) -> Result<ToolResult> {
        Ok(call_bridged(&self.tools, input).await)
    }
}

/// Lists the bridged tools as they were when the registry was built.
struct McpListToolsTool {
    definitions: Vec<ToolDefinition>,
}

#[async_trait]
impl Tool for McpListToolsTool {
    fn name(&self) -> &str {
        MCP_LIST_TOOLS
    }

    fn description(&self) -> &str {
        "List tools offered by connected MCP servers"
    }

    async fn execute(&self, _input: Value) -> Result<ToolResult> {
        Ok(list_result(&self.definitions))
    }
}

/// Live sessions with every configured server that came up.
#[derive(Default)]
pub struct McpBridge {
    clients: Vec<Arc<McpClient>>,
    tools: Vec<Arc<McpTool>>,
}

impl McpBridge {
    /// Connect to every server in `config`; failures are logged and skipped.
    pub async fn connect(config: &McpServersConfig, timeout: Duration) -> Self {
        let mut bridge = Self::default();
        for (name, server) in &config.servers {
            match McpClient::connect(name, server, timeout).await {
                Ok(client) => {
                    if let Err(err) = bridge.add_client(Arc::new(client)).await {
                        warn!(server = %name, error = %err, "MCP server listed no tools; skipping");
                    }
                }
                Err(err) => warn!(server = %name, error = %err, "MCP server unavailable; skipping"),
            }
        }
        if !config.is_empty() {
            info!(
                servers = bridge.clients.len(),
                tools = bridge.tools.len(),
                "MCP bridge ready"
            );
        }
        bridge
    }

    /// Adopt an initialized client and fetch its tools.
    pub async fn add_client(&mut self, client: Arc<McpClient>) -> Result<()> {
        let infos = match client.list_tools().await {
            Ok(infos) => infos,
            Err(err) => {
                client.close().await;
                return Err(err);
            }
        };
        debug!(server = %client.server(), tools = infos.len(), "MCP tools listed");
        self.tools.extend(
            infos
                .into_iter()
                .map(|info| Arc::new(McpTool::new(Arc::clone(&client), info))),
        );
        self.clients.push(client);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name)
    }

    /// Add every bridged tool to `registry`, plus the `mcp_call` and
    /// `mcp_list_tools` actions when any server is up. Clashing names are
    /// logged and skipped.
    pub fn register_into(&self, registry: &mut ToolRegistry) {
        let mut tools: Vec<Arc<dyn Tool>> = self
            .tools
            .iter()
            .map(|tool| Arc::clone(tool) as Arc<dyn Tool>)
            .collect();
        if !self.clients.is_empty() {
            tools.push(Arc::new(McpCallTool {
                tools: self.tools.clone(),
            }));
            tools.push(Arc::new(McpListToolsTool {
                definitions: self.definitions(),
            }));
        }
        for tool in tools {
            let name = tool.name().to_string();
            if let Err(err) = registry.register(tool) {
                warn!(tool = %name, error = %err, "MCP tool not registered");
            }
        }
    }

    /// Manifests of the bridged tools only.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool
                    .input_schema()
                    .unwrap_or_else(|| json!({"type": "object"})),
                available: true,
            })
            .collect()
    }

    /// `mcp_list_tools`: `{"tools": [...], "count": n}` as JSON text.
    pub fn list_tools_result(&self) -> ToolResult {
        list_result(&self.definitions())
    }

    /// `mcp_call`: run a namespaced tool with `{"tool": ..., "arguments": {...}}`.
    pub async fn call(&self, input: Value) -> ToolResult {
        call_bridged(&self.tools, input).await
    }

    /// Close every session.
    pub async fn shutdown(&self) {
        for client in &self.clients {
            client.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use tokio::sync::Mutex;

    use super::*;

    /// Answers each request from a queue of canned results and records what it was sent.
    #[derive(Default)]
    struct ScriptedTransport {
        results: Mutex<VecDeque<JsonRpcMessage>>,
        sent: Arc<Mutex<Vec<JsonRpcMessage>>>,
    }

    impl ScriptedTransport {
        fn answering(results: Vec<Value>) -> (Self, Arc<Mutex<Vec<JsonRpcMessage>>>) {
            let transport = Self {
                results: Mutex::new(
                    results
                        .into_iter()
                        .map(|result| JsonRpcMessage {
                            jsonrpc: "2.0".into(),
                            result: Some(result),
                            ..JsonRpcMessage::default()
                        })
                        .collect(),
                ),
                sent: Arc::default(),
            };
            let sent = Arc::clone(&transport.sent);
            (transport, sent)
        }
    }

    #[async_trait]
    impl McpTransport for ScriptedTransport {
        async fn request(&self, message: &JsonRpcMessage) -> Result<JsonRpcMessage> {
            self.sent.lock().await.push(message.clone());
            let mut reply = self.results.lock().await.pop_front().ok_or(RpcError::Mcp {
                server: "scripted".into(),
                message: "script exhausted".into(),
            })?;
            reply.id = message.id.clone();
            Ok(reply)
        }

        async fn notify(&self, message: &JsonRpcMessage) -> Result<()> {
            self.sent.lock().await.push(message.clone());
            Ok(())
        }

        async fn close(&self) {}
    }

    fn method_of(message: &JsonRpcMessage) -> &str {
        message.method.as_deref().unwrap_or_default()
    }

    #[tokio::test]
    async fn handshake_then_paginated_listing() {
        let (transport, sent) = ScriptedTransport::answering(vec![
            json!({"protocolVersion": PROTOCOL_VERSION, "capabilities": {}}),
            json!({"tools": [{"name": "a"}], "nextCursor": "page2"}),
            json!({"tools": [{"name": "b", "description": "Bee"}]}),
        ]);
        let client = McpClient::initialize("srv", Box::new(transport)).await.unwrap();
        let tools = client.list_tools().await.unwrap();

        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let sent = sent.lock().await;
        let methods: Vec<_> = sent.iter().map(method_of).collect();
        assert_eq!(
            methods,
            vec!["initialize", "notifications/initialized", "tools/list", "tools/list"]
        );
        assert_eq!(sent[1].id, None);
        assert_eq!(sent[3].params, Some(json!({"cursor": "page2"})));
        assert_eq!(sent[0].id, Some(json!(1)));
        assert_eq!(sent[2].id, Some(json!(2)));
    }

    #[tokio::test]
    async fn bridged_tools_are_namespaced_and_described() {
        let (transport, _) = ScriptedTransport::answering(vec![
            json!({}),
            json!({"tools": [
                {"name": "echo", "description": "Echo text",
                 "inputSchema": {"type": "object", "required": ["text"]}},
                {"name": "bare"}
            ]}),
        ]);
        let client = McpClient::initialize("box", Box::new(transport)).await.unwrap();
        let mut bridge = McpBridge::default();
        bridge.add_client(Arc::new(client)).await.unwrap();

        assert_eq!(bridge.tool_names(), vec!["box__echo", "box__bare"]);
        let defs = bridge.definitions();
        assert_eq!(defs[0].input_schema["required"], json!(["text"]));
        assert_eq!(defs[1].description, "MCP tool from box");
        assert_eq!(defs[1].input_schema, json!({"type": "object"}));

        let mut registry = ToolRegistry::new();
        bridge.register_into(&mut registry);
        assert!(registry.contains("box__echo"));
        assert!(!registry.is_builtin("box__echo"));
        assert!(registry.contains(MCP_CALL));

        let listed = registry.execute(MCP_LIST_TOOLS, json!({})).await;
        let listed: Value = serde_json::from_str(&listed.output).unwrap();
        assert_eq!(listed["tools"][0]["name"], "box__echo");

        let listing: Value = serde_json::from_str(&bridge.list_tools_result().output).unwrap();
        assert_eq!(listing["count"], 2);
    }

    #[tokio::test]
    async fn tool_content_is_flattened() {
        let (transport, sent) = ScriptedTransport::answering(vec![
            json!({}),
            json!({"tools": [{"name": "shot"}]}),
            json!({"content": [
                {"type": "text", "text": "line one"},
                {"type": "image", "data": "aGVsbG8=", "mimeType": "image/png"},
                {"type": "text", "text": "line two"}
            ], "isError": true}),
        ]);
        let client = McpClient::initialize("cam", Box::new(transport)).await.unwrap();
        let mut bridge = McpBridge::default();
        bridge.add_client(Arc::new(client)).await.unwrap();

        let result = bridge
            .call(json!({"tool": "cam__shot", "arguments": {"zoom": 2}}))
            .await;
        assert_eq!(
            result,
            ToolResult::error("line one\n[binary: 8 bytes]\nline two")
        );

        let sent = sent.lock().await;
        let call = sent.last().unwrap();
        assert_eq!(
            call.params,
            Some(json!({"name": "shot", "arguments": {"zoom": 2}}))
        );
    }

    #[test]
    fn empty_bridge_adds_nothing() {
        let mut registry = ToolRegistry::new();
        McpBridge::default().register_into(&mut registry);
        assert_eq!(registry.len(), 4);
    }

    #[tokio::test]
    async fn unknown_and_malformed_calls_are_error_results() {
        let bridge = McpBridge::default();
        assert_eq!(
            bridge.call(json!({"tool": "nope__x"})).await,
            ToolResult::error("Unknown MCP tool: nope__x")
        );
        let malformed = bridge.call(json!({"arguments": {}})).await;
        assert!(malformed.is_error);
        assert!(malformed.output.starts_with("invalid input for mcp_call"));
    }

    #[tokio::test]
    async fn server_errors_surface_with_the_server_name() {
        struct Refusing;

        #[async_trait]
        impl McpTransport for Refusing {
            async fn request(&self, message: &JsonRpcMessage) -> Result<JsonRpcMessage> {
                Ok(JsonRpcMessage {
                    jsonrpc: "2.0".into(),
                    id: message.id.clone(),
                    error: Some(JsonRpcError {
                        code: -32600,
                        message: "go away".into(),
                        data: None,
                    }),
                    ..JsonRpcMessage::default()
                })
            }
            async fn notify(&self, _message: &JsonRpcMessage) -> Result<()> {
                Ok(())
            }
            async fn close(&self) {}
        }

        let err = match McpClient::initialize("grumpy", Box::new(Refusing)).await {
            Ok(_) => panic!("handshake should fail"),
            Err(err) => err,
        };
        assert_eq!(
            err.to_string(),
            "MCP server grumpy: initialize failed (-32600): go away"
        );
    }

    #[test]
    fn messages_serialize_without_empty_fields() {
        let text = serde_json::to_string(&JsonRpcMessage::notification("ping")).unwrap();
        assert_eq!(text, r#"{"jsonrpc":"2.0","method":"ping"}"#);
        assert!(!JsonRpcMessage::request(1, "x", json!({})).is_response());
        assert!(JsonRpcMessage::method_not_found(json!(4)).is_response());
    }
}
