//! RPC layer for agentwire device links.
//!
//! A device sends JSON requests inside frames; [`RpcDispatcher`] turns each
//! into exactly one JSON reply:
//! - `api` requests are forwarded to a [`CompletionService`]
//! - `tool` requests run against an explicitly constructed [`ToolRegistry`]
//! - anything else gets `{"error":"Unknown type: ..."}`
//!
//! Tools offered by MCP servers join the registry through [`McpBridge`].

pub mod completion;
pub mod dispatcher;
pub mod error;
pub mod mcp;
pub mod message;
pub mod schema;
pub mod tools;

pub use completion::{AnthropicClient, CompletionService};
pub use dispatcher::{DispatcherConfig, RpcDispatcher, DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
pub use error::{Result, RpcError};
pub use mcp::{McpBridge, McpClient, McpServerConfig, McpServersConfig};
pub use message::{ApiResult, RpcReply, RpcRequest, ToolResult};
pub use tools::{Tool, ToolDefinition, ToolRegistry};
