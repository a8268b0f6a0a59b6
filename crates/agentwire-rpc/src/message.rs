//! JSON request and reply payloads carried inside device frames.
//!
//! Requests:
//! ```text
//! {"type":"api","body":"<JSON-encoded Messages API request>"}
//! {"type":"tool","name":"bash","input":{"command":"ls"}}
//! ```
//!
//! Replies:
//! ```text
//! {"type":"api_result","body":"<JSON-encoded response>"}
//! {"type":"api_result","error":"..."}
//! {"type":"tool_result","output":"...","is_error":false}
//! {"error":"Unknown type: frobnicate"}
//! ```

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Result, RpcError};

/// A decoded device request.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcRequest {
    /// Forward a completion request upstream. `body` is itself JSON text.
    Api { body: String },
    /// Run a local tool.
    Tool { name: String, input: Value },
    /// Anything else, keyed by the `type` it carried (empty when absent).
    Unknown { kind: String },
}

#[derive(Deserialize)]
struct RawRequest {
    #[serde(rename = "type", default)]
    kind: Option<Value>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}

impl RpcRequest {
    /// Decode a request payload.
    ///
    /// Only malformed outer JSON is an error. A missing `body` defaults to
    /// `"{}"`, a missing `input` to an empty object; a string `input` is
    /// decoded as embedded JSON.
    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        let raw: RawRequest = serde_json::from_slice(payload)?;
        let kind = match raw.kind {
            Some(Value::String(kind)) => kind,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        Ok(match kind.as_str() {
            "api" => RpcRequest::Api {
                body: match raw.body {
                    Some(Value::String(body)) => body,
                    Some(Value::Null) | None => "{}".to_string(),
                    Some(other) => other.to_string(),
                },
            },
            "tool" => RpcRequest::Tool {
                name: raw.name.unwrap_or_default(),
                input: raw.input.unwrap_or_else(|| Value::Object(Default::default())),
            },
            _ => RpcRequest::Unknown { kind },
        })
    }
}

/// Normalize a tool input that may arrive as embedded JSON text.
pub fn decode_tool_input(input: Value) -> Result<Value> {
    match input {
        Value::String(text) => Ok(serde_json::from_str(&text)?),
        Value::Null => Ok(Value::Object(Default::default())),
        other => Ok(other),
    }
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "tool_result")]
pub struct ToolResult {
    pub output: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: true,
        }
    }
}

impl From<RpcError> for ToolResult {
    fn from(err: RpcError) -> Self {
        ToolResult::error(err.to_string())
    }
}

/// Outcome of one completion forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "api_result")]
pub struct ApiResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Any reply the dispatcher can produce.
///
/// Decoding goes by the `type` field; an object without one is an error reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RpcReply {
    Api(ApiResult),
    Tool(ToolResult),
    Error { error: String },
}

impl RpcReply {
    pub fn api_body(body: String) -> Self {
        RpcReply::Api(ApiResult {
            body: Some(body),
            error: None,
        })
    }

    pub fn api_error(error: impl ToString) -> Self {
        RpcReply::Api(ApiResult {
            body: None,
            error: Some(error.to_string()),
        })
    }

    pub fn unknown_type(kind: &str) -> Self {
        RpcReply::Error {
            error: format!("Unknown type: {kind}"),
        }
    }

    /// Serialize for the wire.
    pub fn to_vec(&self) -> Vec<u8> {
        // Every variant is plain strings and bools; serialization cannot fail.
        serde_json::to_vec(self).unwrap_or_else(|_| br#"{"error":"serialization failed"}"#.to_vec())
    }
}

impl<'de> Deserialize<'de> for RpcReply {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct ErrorReply {
            error: String,
        }

        let value = Value::deserialize(deserializer)?;
        match value.get("type") {
            Some(Value::String(kind)) if kind == "api_result" => ApiResult::deserialize(value)
                .map(RpcReply::Api)
                .map_err(D::Error::custom),
            Some(Value::String(kind)) if kind == "tool_result" => ToolResult::deserialize(value)
                .map(RpcReply::Tool)
                .map_err(D::Error::custom),
            Some(other) => Err(D::Error::custom(format!("unknown reply type: {other}"))),
            None => ErrorReply::deserialize(value)
                .map(|reply| RpcReply::Error { error: reply.error })
                .map_err(D::Error::custom),
        }
    }
}

impl From<ToolResult> for RpcReply {
    fn from(result: ToolResult) -> Self {
        RpcReply::Tool(result)
    }
}
