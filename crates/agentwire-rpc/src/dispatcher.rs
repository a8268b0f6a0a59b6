use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::completion::CompletionService;
use crate::message::{decode_tool_input, RpcReply, RpcRequest, ToolResult};
use crate::tools::ToolRegistry;

/// Model used when a request names none.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

/// `max_tokens` used when a device request names none.
pub const DEFAULT_MAX_TOKENS: u64 = 8192;

/// Defaults applied to forwarded completion requests.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub model: String,
    pub max_tokens: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Turns one request payload into one reply payload.
///
/// `dispatch` never fails. Malformed input, unknown request types, tool
/// failures and upstream errors all come back as JSON error replies, so the
/// owning transport loop always has something to send and keeps running.
#[derive(Clone)]
pub struct RpcDispatcher {
    completion: Arc<dyn CompletionService>,
    tools: Arc<ToolRegistry>,
    config: DispatcherConfig,
}

impl RpcDispatcher {
    pub fn new(completion: Arc<dyn CompletionService>, tools: Arc<ToolRegistry>) -> Self {
        Self::with_config(completion, tools, DispatcherConfig::default())
    }

    pub fn with_config(
        completion: Arc<dyn CompletionService>,
        tools: Arc<ToolRegistry>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            completion,
            tools,
            config,
        }
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Dispatch a raw frame payload and return the encoded reply.
    pub async fn dispatch(&self, payload: &[u8]) -> Vec<u8> {
        self.dispatch_reply(payload).await.to_vec()
    }

    /// Dispatch a raw frame payload and return the structured reply.
    pub async fn dispatch_reply(&self, payload: &[u8]) -> RpcReply {
        let request = match RpcRequest::from_slice(payload) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, len = payload.len(), "undecodable request payload");
                return RpcReply::Error {
                    error: err.to_string(),
                };
            }
        };

        match request {
            RpcRequest::Api { body } => self.forward_api(&body).await,
            RpcRequest::Tool { name, input } => self.run_tool(&name, input).await.into(),
            RpcRequest::Unknown { kind } => {
                debug!(kind = %kind, "unknown request type");
                RpcReply::unknown_type(&kind)
            }
        }
    }

    async fn forward_api(&self, body: &str) -> RpcReply {
        let body: Map<String, Value> = match serde_json::from_str(body) {
            Ok(body) => body,
            Err(err) => return RpcReply::api_error(format!("invalid API body: {err}")),
        };
        let request = self.completion_request(body);
        debug!(model = %request["model"], "forwarding completion request");

        match self.completion.create_message(&request).await {
            Ok(response) => RpcReply::api_body(response),
            Err(err) => {
                warn!(error = %err, "completion request failed");
                RpcReply::api_error(err)
            }
        }
    }

    /// Build the upstream request, filling defaults for absent fields.
    ///
    /// An empty `system` prompt or `tools` list is omitted rather than sent.
    pub fn completion_request(&self, mut body: Map<String, Value>) -> Value {
        let model = body
            .remove("model")
            .filter(|m| !m.is_null())
            .unwrap_or_else(|| Value::String(self.config.model.clone()));
        let max_tokens = body
            .remove("max_tokens")
            .filter(|m| !m.is_null())
            .unwrap_or_else(|| json!(self.config.max_tokens));
        let messages = body.remove("messages").unwrap_or_else(|| json!([]));

        let mut request = Map::new();
        request.insert("model".to_string(), model);
        request.insert("max_tokens".to_string(), max_tokens);
        request.insert("messages".to_string(), messages);
        if let Some(system) = body.remove("system").filter(|s| !is_blank(s)) {
            request.insert("system".to_string(), system);
        }
        if let Some(tools) = body.remove("tools").filter(|t| !is_blank(t)) {
            request.insert("tools".to_string(), tools);
        }
        Value::Object(request)
    }

    async fn run_tool(&self, name: &str, input: Value) -> ToolResult {
        let input = match decode_tool_input(input) {
            Ok(input) => input,
            Err(err) => return ToolResult::error(format!("invalid tool input: {err}")),
        };
        debug!(tool = %name, "running tool");
        self.tools.execute(name, input).await
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{Result, RpcError};

    #[derive(Default)]
    struct RecordingCompletion {
        requests: Mutex<Vec<Value>>,
        fail: bool,
    }

    #[async_trait]
    impl CompletionService for RecordingCompletion {
        async fn create_message(&self, request: &Value) -> Result<String> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(RpcError::Api {
                    status: 529,
                    message: "overloaded_error: Overloaded".to_string(),
                });
            }
            Ok(r#"{"content":[{"type":"text","text":"ok"}]}"#.to_string())
        }
    }

    fn dispatcher(completion: Arc<RecordingCompletion>) -> RpcDispatcher {
        RpcDispatcher::new(completion, Arc::new(ToolRegistry::new()))
    }

    async fn dispatch_json(d: &RpcDispatcher, payload: Value) -> Value {
        let reply = d.dispatch(payload.to_string().as_bytes()).await;
        serde_json::from_slice(&reply).unwrap()
    }

    #[tokio::test]
    async fn bash_echo_hi() {
        let d = dispatcher(Arc::default());
        let reply = dispatch_json(
            &d,
            json!({"type": "tool", "name": "bash", "input": {"command": "echo hi"}}),
        )
        .await;
        assert_eq!(
            reply,
            json!({"type": "tool_result", "output": "hi\n", "is_error": false})
        );
    }

    #[tokio::test]
    async fn tool_input_may_be_a_json_string() {
        let d = dispatcher(Arc::default());
        let reply = dispatch_json(
            &d,
            json!({"type": "tool", "name": "bash", "input": "{\"command\":\"echo str\"}"}),
        )
        .await;
        assert_eq!(reply["output"], "str\n");
    }

    #[tokio::test]
    async fn bad_string_tool_input_is_error_result() {
        let d = dispatcher(Arc::default());
        let reply = dispatch_json(
            &d,
            json!({"type": "tool", "name": "bash", "input": "{nope"}),
        )
        .await;
        assert_eq!(reply["type"], "tool_result");
        assert_eq!(reply["is_error"], true);
    }

    #[tokio::test]
    async fn unknown_type() {
        let d = dispatcher(Arc::default());
        let reply = dispatch_json(&d, json!({"type": "bogus"})).await;
        assert_eq!(reply, json!({"error": "Unknown type: bogus"}));
    }

    #[tokio::test]
    async fn unknown_tool() {
        let d = dispatcher(Arc::default());
        let reply = dispatch_json(&d, json!({"type": "tool", "name": "warp"})).await;
        assert_eq!(
            reply,
            json!({"type": "tool_result", "output": "Unknown tool: warp", "is_error": true})
        );
    }

    #[tokio::test]
    async fn malformed_payload_becomes_error_reply() {
        let d = dispatcher(Arc::default());
        let reply: Value = serde_json::from_slice(&d.dispatch(b"{\"type\":").await).unwrap();
        assert!(reply["error"].as_str().unwrap().starts_with("invalid JSON"));
    }

    #[tokio::test]
    async fn api_forward_fills_defaults() {
        let completion = Arc::new(RecordingCompletion::default());
        let d = dispatcher(Arc::clone(&completion));

        let body = json!({"messages": [{"role": "user", "content": "hi"}], "system": ""});
        let reply = dispatch_json(&d, json!({"type": "api", "body": body.to_string()})).await;

        assert_eq!(reply["type"], "api_result");
        assert_eq!(
            reply["body"],
            r#"{"content":[{"type":"text","text":"ok"}]}"#
        );

        let sent = completion.requests.lock().unwrap()[0].clone();
        assert_eq!(
            sent,
            json!({
                "model": DEFAULT_MODEL,
                "max_tokens": DEFAULT_MAX_TOKENS,
                "messages": [{"role": "user", "content": "hi"}]
            })
        );
    }

    #[tokio::test]
    async fn api_forward_keeps_explicit_fields() {
        let completion = Arc::new(RecordingCompletion::default());
        let d = dispatcher(Arc::clone(&completion));

        let body = json!({
            "model": "claude-haiku",
            "max_tokens": 10,
            "system": "be brief",
            "tools": [{"name": "bash"}],
            "messages": [],
            "stream": true
        });
        dispatch_json(&d, json!({"type": "api", "body": body.to_string()})).await;

        let sent = completion.requests.lock().unwrap()[0].clone();
        assert_eq!(sent["model"], "claude-haiku");
        assert_eq!(sent["max_tokens"], 10);
        assert_eq!(sent["system"], "be brief");
        assert_eq!(sent["tools"], json!([{"name": "bash"}]));
        assert!(sent.get("stream").is_none());
    }

    #[tokio::test]
    async fn upstream_failure_is_api_error_reply() {
        let completion = Arc::new(RecordingCompletion {
            fail: true,
            ..Default::default()
        });
        let d = dispatcher(completion);
        let reply = dispatch_json(&d, json!({"type": "api", "body": "{}"})).await;
        assert_eq!(
            reply,
            json!({
                "type": "api_result",
                "error": "completion API error (529): overloaded_error: Overloaded"
            })
        );
    }

    #[tokio::test]
    async fn invalid_api_body_is_api_error_reply() {
        let d = dispatcher(Arc::default());
        let reply = dispatch_json(&d, json!({"type": "api", "body": "not json"})).await;
        assert_eq!(reply["type"], "api_result");
        assert!(reply["error"].as_str().unwrap().starts_with("invalid API body"));
    }
}
