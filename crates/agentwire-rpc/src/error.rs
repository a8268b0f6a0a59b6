/// Errors raised while decoding requests, running tools or calling the
/// completion backend.
///
/// None of these escape [`crate::RpcDispatcher::dispatch`]; they are turned
/// into structured reply payloads at that boundary.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// A payload or embedded body is not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A tool input failed its declared schema.
    #[error("invalid input for {tool}: {message}")]
    InvalidInput { tool: String, message: String },

    /// A tool schema could not be compiled at registration.
    #[error("failed to compile schema for {tool}: {message}")]
    SchemaCompile { tool: String, message: String },

    /// A tool with this name is already registered.
    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    /// Built-in tools cannot be replaced by extensions.
    #[error("cannot override built-in tool: {0}")]
    BuiltinOverride(String),

    /// A tool ran and failed.
    #[error("{0}")]
    Tool(String),

    /// A tool exceeded its wall-clock budget.
    #[error("{tool} timed out after {after:?}")]
    Timeout {
        tool: String,
        after: std::time::Duration,
    },

    /// An MCP server failed to start, answered with an error or broke protocol.
    #[error("MCP server {server}: {message}")]
    Mcp { server: String, message: String },

    /// The MCP server list could not be used.
    #[error("invalid MCP config: {0}")]
    McpConfig(String),

    /// Filesystem or process I/O failed.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// The HTTP request to the completion backend failed.
    #[error("completion request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The completion backend answered with an error.
    #[error("completion API error ({status}): {message}")]
    Api { status: u16, message: String },
}

pub type Result<T> = std::result::Result<T, RpcError>;
