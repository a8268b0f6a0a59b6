use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;

use super::{parse_input, Tool};
use crate::error::{Result, RpcError};
use crate::message::ToolResult;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Result lines kept before the listing is cut.
pub const MAX_SEARCH_LINES: usize = 100;

#[derive(Deserialize)]
struct SearchInput {
    pattern: String,
    #[serde(default = "default_path")]
    path: String,
}

fn default_path() -> String {
    ".".to_string()
}

/// Recursive `grep -rn` over a directory tree.
pub struct SearchTool {
    timeout: Duration,
}

impl Default for SearchTool {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search files recursively for a pattern"
    }

    fn input_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string"},
                "path": {"type": "string", "default": "."}
            },
            "required": ["pattern"]
        }))
    }

    fn requires(&self) -> Option<&str> {
        Some("grep")
    }

    async fn execute(&self, input: Value) -> Result<ToolResult> {
        let SearchInput { pattern, path } = parse_input(self.name(), input)?;

        let grep = Command::new("grep")
            .args(["-rn", "--", pattern.as_str(), path.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, grep)
            .await
            .map_err(|_| RpcError::Timeout {
                tool: self.name().to_string(),
                after: self.timeout,
            })??;

        Ok(ToolResult::ok(summarize(&String::from_utf8_lossy(
            &output.stdout,
        ))))
    }
}

fn summarize(stdout: &str) -> String {
    let lines: Vec<&str> = stdout.lines().collect();
    if lines.is_empty() {
        return "No matches found".to_string();
    }
    if lines.len() > MAX_SEARCH_LINES {
        return format!(
            "{}\n... ({} total lines)",
            lines[..MAX_SEARCH_LINES].join("\n"),
            lines.len()
        );
    }
    stdout.to_string()
}
