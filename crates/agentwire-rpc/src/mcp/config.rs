use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, RpcError};

/// How to reach one MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawServerConfig")]
pub enum McpServerConfig {
    /// Spawn a child process and speak newline-delimited JSON-RPC on its stdio.
    Stdio {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    },
    /// POST JSON-RPC to a streamable HTTP endpoint.
    Http { url: String },
}

#[derive(Deserialize)]
struct RawServerConfig {
    #[serde(default)]
    transport: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    url: Option<String>,
}

impl TryFrom<RawServerConfig> for McpServerConfig {
    type Error = String;

    fn try_from(raw: RawServerConfig) -> std::result::Result<Self, Self::Error> {
        match raw.transport.as_deref().unwrap_or("stdio") {
            "stdio" => {
                let command = raw
                    .command
                    .filter(|c| !c.trim().is_empty())
                    .ok_or("stdio server needs a command")?;
                Ok(Self::Stdio {
                    command,
                    args: raw.args,
                    env: raw.env,
                })
            }
            "http" => {
                let url = raw
                    .url
                    .filter(|u| !u.trim().is_empty())
                    .ok_or("http server needs a url")?;
                Ok(Self::Http { url })
            }
            other => Err(format!("unknown transport: {other}")),
        }
    }
}

/// The per-user `mcp_servers.json` file: `{"mcpServers": {name: server}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct McpServersConfig {
    #[serde(rename = "mcpServers", default)]
    pub servers: BTreeMap<String, McpServerConfig>,
}

impl McpServersConfig {
    /// Read the server list from `path`; a missing file means no servers.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no MCP config file");
                return Ok(Self::default());
            }
            Err(err) => return Err(err.into()),
        };
        Self::parse(&text).map_err(|err| match err {
            RpcError::McpConfig(message) => {
                RpcError::McpConfig(format!("{}: {message}", path.display()))
            }
            other => other,
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|err| RpcError::McpConfig(err.to_string()))?;
        if let Some(name) = config.servers.keys().find(|name| name.contains(TOOL_SEPARATOR)) {
            return Err(RpcError::McpConfig(format!(
                "server name {name:?} must not contain {TOOL_SEPARATOR:?}"
            )));
        }
        Ok(config)
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

/// Joins a server name and its tool name into the registry name.
pub const TOOL_SEPARATOR: &str = "__";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdio_is_the_default_transport() {
        let config = McpServersConfig::parse(
            r#"{"mcpServers": {
                "files": {"command": "mcp-files", "args": ["--root", "/tmp"], "env": {"A": "1"}},
                "remote": {"transport": "http", "url": "http://localhost:9000/mcp"}
            }}"#,
        )
        .unwrap();

        assert_eq!(
            config.servers["files"],
            McpServerConfig::Stdio {
                command: "mcp-files".into(),
                args: vec!["--root".into(), "/tmp".into()],
                env: BTreeMap::from([("A".into(), "1".into())]),
            }
        );
        assert_eq!(
            config.servers["remote"],
            McpServerConfig::Http {
                url: "http://localhost:9000/mcp".into()
            }
        );
    }

    #[test]
    fn incomplete_servers_are_rejected() {
        let err = McpServersConfig::parse(r#"{"mcpServers": {"x": {"args": []}}}"#).unwrap_err();
        assert!(err.to_string().contains("needs a command"), "{err}");

        let err = McpServersConfig::parse(r#"{"mcpServers": {"x": {"transport": "http"}}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("needs a url"), "{err}");

        let err =
            McpServersConfig::parse(r#"{"mcpServers": {"x": {"transport": "carrier-pigeon"}}}"#)
                .unwrap_err();
        assert!(err.to_string().contains("unknown transport"), "{err}");
    }

    #[test]
    fn separator_in_server_name_is_rejected() {
        let err = McpServersConfig::parse(r#"{"mcpServers": {"a__b": {"command": "x"}}}"#)
            .unwrap_err();
        assert!(matches!(err, RpcError::McpConfig(_)));
    }

    #[test]
    fn missing_file_means_no_servers() {
        let config = McpServersConfig::load(Path::new("/nonexistent/agentwire/mcp.json")).unwrap();
        assert!(config.is_empty());
    }

    #[test]
    fn empty_object_means_no_servers() {
        assert!(McpServersConfig::parse("{}").unwrap().is_empty());
    }
}
