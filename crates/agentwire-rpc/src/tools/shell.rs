use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use super::{parse_input, Tool};
use crate::error::{Result, RpcError};
use crate::message::ToolResult;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const STDERR_MARKER: &str = "\n--- stderr ---\n";

#[derive(Deserialize)]
struct BashInput {
    command: String,
}

/// Runs a shell command through `sh -c`.
pub struct BashTool {
    timeout: Duration,
}

impl BashTool {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for BashTool {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command and return its output"
    }

    fn input_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "Shell command to run"}
            },
            "required": ["command"]
        }))
    }

    fn requires(&self) -> Option<&str> {
        Some("sh")
    }

    async fn execute(&self, input: Value) -> Result<ToolResult> {
        let BashInput { command } = parse_input(self.name(), input)?;
        debug!(command = %preview(&command), "running shell command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| RpcError::Timeout {
                tool: self.name().to_string(),
                after: self.timeout,
            })??;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.stderr.is_empty() {
            text.push_str(STDERR_MARKER);
            text.push_str(&String::from_utf8_lossy(&output.stderr));
        }
        if text.is_empty() {
            text.push_str("(no output)");
        }

        Ok(ToolResult {
            output: text,
            is_error: !output.status.success(),
        })
    }
}

fn preview(command: &str) -> String {
    command.chars().take(80).collect()
}
