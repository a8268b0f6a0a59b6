use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_input, Tool};
use crate::error::{Result, RpcError};
use crate::message::ToolResult;

/// Size cap for file reads and writes.
pub const MAX_FILE_BYTES: u64 = 1024 * 1024;

#[derive(Deserialize)]
struct ReadInput {
    path: String,
}

#[derive(Deserialize)]
struct WriteInput {
    path: String,
    content: String,
}

pub struct ReadFileTool;

pub struct WriteFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file"
    }

    fn input_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"]
        }))
    }

    async fn execute(&self, input: Value) -> Result<ToolResult> {
        let ReadInput { path } = parse_input(self.name(), input)?;

        let size = tokio::fs::metadata(&path).await?.len();
        if size > MAX_FILE_BYTES {
            return Err(RpcError::Tool(format!(
                "file too large ({size} bytes, max {MAX_FILE_BYTES}): {path}"
            )));
        }

        let content = tokio::fs::read_to_string(&path).await?;
        if content.is_empty() {
            return Ok(ToolResult::ok("(empty file)"));
        }
        Ok(ToolResult::ok(content))
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write text to a file, creating parent directories"
    }

    fn input_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["path", "content"]
        }))
    }

    async fn execute(&self, input: Value) -> Result<ToolResult> {
        let WriteInput { path, content } = parse_input(self.name(), input)?;

        let len = content.len();
        if len as u64 > MAX_FILE_BYTES {
            return Err(RpcError::Tool(format!(
                "content too large ({len} bytes, max {MAX_FILE_BYTES})"
            )));
        }

        let parent = match Path::new(&path).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        tokio::fs::create_dir_all(parent).await?;
        tokio::fs::write(&path, content).await?;

        Ok(ToolResult::ok(format!("Wrote {len} bytes to {path}")))
    }
}
