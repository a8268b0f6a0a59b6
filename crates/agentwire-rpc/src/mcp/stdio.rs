use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::{JsonRpcMessage, McpTransport};
use crate::error::{Result, RpcError};

struct Pipes {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// Newline-delimited JSON-RPC over a child process's stdin and stdout.
pub struct StdioTransport {
    server: String,
    timeout: Duration,
    pipes: Mutex<Pipes>,
    child: Mutex<Option<Child>>,
}

impl StdioTransport {
    /// Start `command` with `args` and extra `env`; stderr is forwarded to the log.
    pub fn spawn(
        server: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| RpcError::Mcp {
                server: server.to_string(),
                message: format!("failed to start {command}: {err}"),
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(RpcError::Mcp {
                server: server.to_string(),
                message: "child stdio was not captured".to_string(),
            });
        };
        if let Some(stderr) = child.stderr.take() {
            let name = server.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %name, "{line}");
                }
            });
        }
        debug!(server, command, pid = child.id(), "MCP server started");

        Ok(Self {
            server: server.to_string(),
            timeout,
            pipes: Mutex::new(Pipes {
                stdin,
                stdout: BufReader::new(stdout).lines(),
            }),
            child: Mutex::new(Some(child)),
        })
    }

    fn error(&self, message: impl Into<String>) -> RpcError {
        RpcError::Mcp {
            server: self.server.clone(),
            message: message.into(),
        }
    }

    async fn write(&self, pipes: &mut Pipes, message: &JsonRpcMessage) -> Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        let sent = match pipes.stdin.write_all(&line).await {
            Ok(()) => pipes.stdin.flush().await,
            Err(err) => Err(err),
        };
        sent.map_err(|err| self.error(format!("write failed: {err}")))
    }

    /// Read lines until the response for `id` arrives.
    async fn read_response(&self, pipes: &mut Pipes, id: &Value) -> Result<JsonRpcMessage> {
        loop {
            let next = pipes
                .stdout
                .next_line()
                .await
                .map_err(|err| self.error(format!("read failed: {err}")))?;
            let Some(line) = next else {
                return Err(self.error("server closed its output"));
            };
            let message: JsonRpcMessage = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(_) => {
                    trace!(server = %self.server, line = %line, "skipping non-JSON-RPC output");
                    continue;
                }
            };
            if message.is_response() {
                if message.id.as_ref() == Some(id) {
                    return Ok(message);
                }
                debug!(server = %self.server, id = ?message.id, "dropping stray response");
                continue;
            }
            match (message.id, message.method) {
                (Some(request_id), Some(method)) => {
                    debug!(server = %self.server, method = %method, "declining server request");
                    self.write(pipes, &JsonRpcMessage::method_not_found(request_id))
                        .await?;
                }
                (None, Some(method)) => trace!(server = %self.server, method = %method, "notification"),
                _ => {}
            }
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, message: &JsonRpcMessage) -> Result<JsonRpcMessage> {
        let id = message
            .id
            .clone()
            .ok_or_else(|| self.error("request without an id"))?;
        let mut pipes = self.pipes.lock().await;
        self.write(&mut pipes, message).await?;
        tokio::time::timeout(self.timeout, self.read_response(&mut pipes, &id))
            .await
            .map_err(|_| {
                self.error(format!(
                    "no response to {} within {:?}",
                    message.method.as_deref().unwrap_or("request"),
                    self.timeout
                ))
            })?
    }

    async fn notify(&self, message: &JsonRpcMessage) -> Result<()> {
        let mut pipes = self.pipes.lock().await;
        self.write(&mut pipes, message).await
    }

    async fn close(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(err) = child.kill().await {
                debug!(server = %self.server, error = %err, "MCP server already exited");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::{McpBridge, McpClient, McpServerConfig, McpServersConfig};
    use super::*;
    use crate::message::ToolResult;
    use crate::tools::ToolRegistry;

    /// A tiny MCP server: answers by method, chatters before listing tools,
    /// and asks the client an unsupported question once.
    const SCRIPTED_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-03-26","capabilities":{}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      echo 'warming up'
      printf '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}\n'
      printf '{"jsonrpc":"2.0","id":99,"method":"roots/list"}\n'
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"Echo text","inputSchema":{"type":"object","properties":{"text":{"type":"string"}},"required":["text"]}}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      text=$(printf '%s' "$line" | sed -n 's/.*"text":"\([^"]*\)".*/\1/p')
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"echo: %s"}]}}\n' "$id" "$text" ;;
  esac
done
"#;

    fn scripted(script: &str) -> McpServerConfig {
        McpServerConfig::Stdio {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            env: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn scripted_child_serves_tools_through_the_registry() {
        let config = McpServersConfig {
            servers: BTreeMap::from([("kit".to_string(), scripted(SCRIPTED_SERVER))]),
        };
        let bridge = McpBridge::connect(&config, Duration::from_secs(5)).await;
        assert_eq!(bridge.tool_names(), vec!["kit__echo"]);

        let mut registry = ToolRegistry::new();
        bridge.register_into(&mut registry);

        let result = registry.execute("kit__echo", json!({"text": "hello"})).await;
        assert_eq!(result, ToolResult::ok("echo: hello"));

        let invalid = registry.execute("kit__echo", json!({"text": 3})).await;
        assert!(invalid.is_error);

        let via_action = bridge
            .call(json!({"tool": "kit__echo", "arguments": {"text": "again"}}))
            .await;
        assert_eq!(via_action, ToolResult::ok("echo: again"));

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let err = match McpClient::connect(
            "mute",
            &scripted("cat > /dev/null"),
            Duration::from_millis(200),
        )
        .await
        {
            Ok(_) => panic!("handshake should time out"),
            Err(err) => err,
        };
        assert_eq!(
            err.to_string(),
            "MCP server mute: no response to initialize within 200ms"
        );
    }

    #[tokio::test]
    async fn exiting_server_is_reported() {
        let err = match McpClient::connect("gone", &scripted("exit 0"), Duration::from_secs(5))
            .await
        {
            Ok(_) => panic!("handshake should fail"),
            Err(err) => err,
        };
        assert!(
            err.to_string().starts_with("MCP server gone:"),
            "{err}"
        );
    }

    #[tokio::test]
    async fn unavailable_servers_are_skipped() {
        let config = McpServersConfig {
            servers: BTreeMap::from([
                (
                    "missing".to_string(),
                    McpServerConfig::Stdio {
                        command: "agentwire-definitely-not-installed".into(),
                        args: vec![],
                        env: BTreeMap::new(),
                    },
                ),
                ("kit".to_string(), scripted(SCRIPTED_SERVER)),
            ]),
        };
        let bridge = McpBridge::connect(&config, Duration::from_secs(5)).await;
        assert_eq!(bridge.tool_names(), vec!["kit__echo"]);
        bridge.shutdown().await;
    }
}
