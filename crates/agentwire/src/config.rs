use std::path::{Path, PathBuf};

use agentwire_channels::ChannelsConfig;
use agentwire_rpc::McpServersConfig;
use tracing::{debug, warn};

const CONFIG_DIR: &str = ".agentwire";
const CONFIG_FILE: &str = "channels.json";
const MCP_FILE: &str = "mcp_servers.json";

/// `~/.agentwire/channels.json`, when a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// `~/.agentwire/mcp_servers.json`, when a home directory is known.
pub fn default_mcp_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(MCP_FILE))
}

/// Load the MCP server list; like channel settings, problems mean no servers.
pub fn load_mcp_config(explicit: Option<&Path>) -> McpServersConfig {
    let Some(path) = explicit.map(Path::to_path_buf).or_else(default_mcp_config_path) else {
        return McpServersConfig::default();
    };

    match McpServersConfig::load(&path) {
        Ok(config) => {
            debug!(path = %path.display(), servers = config.servers.len(), "loaded MCP config");
            config
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to load MCP config; no MCP servers");
            McpServersConfig::default()
        }
    }
}

/// Load channel settings. A missing, unreadable or malformed file falls back
/// to the defaults with a warning; serving never fails on configuration.
pub fn load_channels_config(explicit: Option<&Path>) -> ChannelsConfig {
    let Some(path) = explicit.map(Path::to_path_buf).or_else(default_config_path) else {
        debug!("no home directory; using default channel config");
        return ChannelsConfig::default();
    };

    match ChannelsConfig::load(&path) {
        Ok(config) => {
            debug!(path = %path.display(), "loaded channel config");
            config
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to load channel config; using defaults");
            ChannelsConfig::default()
        }
    }
}
