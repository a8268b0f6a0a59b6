use std::path::PathBuf;
use std::sync::Arc;

use agentwire_rpc::mcp::DEFAULT_REQUEST_TIMEOUT;
use agentwire_rpc::{
    AnthropicClient, DispatcherConfig, McpBridge, RpcDispatcher, ToolRegistry, DEFAULT_MODEL,
};
use agentwire_transport::DEFAULT_BAUD_RATE;
use clap::{Args, Subcommand};

use crate::config::load_mcp_config;
use crate::exit::{rpc_error, CliError, CliResult, INTERNAL};
use crate::output::OutputFormat;

pub mod device;
pub mod exec_tool;
pub mod serve;
pub mod tools;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve one device link (socket, serial port or radio).
    Device(DeviceArgs),
    /// Serve chat channels through the message router.
    Serve(ServeArgs),
    /// Run one tool command and print its result as JSON.
    ExecTool(ExecToolArgs),
    /// List registered tools.
    Tools(ToolsArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("failed to start runtime: {err}")))?;

    match command {
        Command::Device(args) => runtime.block_on(device::run(args)),
        Command::Serve(args) => runtime.block_on(serve::run(args)),
        Command::ExecTool(args) => runtime.block_on(exec_tool::run(args)),
        Command::Tools(args) => runtime.block_on(tools::run(args, format)),
        Command::Version(args) => version::run(args),
    }
}

/// Upstream completion settings shared by `device` and `serve`.
#[derive(Args, Debug)]
pub struct ApiArgs {
    /// Completion API key.
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
    /// Model used when a request does not name one.
    #[arg(long, env = "AGENTWIRE_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,
}

impl ApiArgs {
    /// Build the completion client, failing with exit code 1 when no key is set.
    pub fn client(&self) -> CliResult<AnthropicClient> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| CliError::usage("set ANTHROPIC_API_KEY (or pass --api-key)"))?;
        AnthropicClient::new(api_key)
            .map_err(|err| rpc_error("failed to create completion client", err))
    }

    pub fn dispatcher(&self, client: AnthropicClient, tools: ToolRegistry) -> RpcDispatcher {
        let config = DispatcherConfig {
            model: self.model.clone(),
            ..DispatcherConfig::default()
        };
        RpcDispatcher::with_config(Arc::new(client), Arc::new(tools), config)
    }
}

/// MCP servers whose tools join the registry.
#[derive(Args, Debug, Default)]
pub struct McpArgs {
    /// MCP server list. Default: ~/.agentwire/mcp_servers.json.
    #[arg(long, env = "AGENTWIRE_MCP_CONFIG", value_name = "FILE")]
    pub mcp_config: Option<PathBuf>,
    /// Do not start or contact any MCP server.
    #[arg(long)]
    pub no_mcp: bool,
}

impl McpArgs {
    pub async fn bridge(&self) -> McpBridge {
        if self.no_mcp {
            return McpBridge::default();
        }
        let config = load_mcp_config(self.mcp_config.as_deref());
        McpBridge::connect(&config, DEFAULT_REQUEST_TIMEOUT).await
    }

    /// The built-in tools plus every bridged one. Keep the bridge to shut it down.
    pub async fn registry(&self) -> (ToolRegistry, McpBridge) {
        let bridge = self.bridge().await;
        let mut registry = ToolRegistry::new();
        bridge.register_into(&mut registry);
        (registry, bridge)
    }
}

#[derive(Args, Debug)]
pub struct DeviceArgs {
    /// Unix socket path for simulated devices.
    #[arg(long, value_name = "PATH")]
    pub socket: Option<PathBuf>,
    /// Serial port path.
    #[arg(long, value_name = "PORT")]
    pub serial: Option<String>,
    /// Serial baud rate.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,
    /// Discover and serve a radio (BLE) device.
    #[arg(long)]
    pub radio: bool,
    #[command(flatten)]
    pub api: ApiArgs,
    #[command(flatten)]
    pub mcp: McpArgs,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Channels to enable (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "webhook")]
    pub channels: Vec<String>,
    /// Channel configuration file. Default: ~/.agentwire/channels.json.
    #[arg(long, env = "AGENTWIRE_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,
    #[command(flatten)]
    pub tokens: ChannelTokens,
    #[command(flatten)]
    pub api: ApiArgs,
    #[command(flatten)]
    pub mcp: McpArgs,
}

/// Chat platform credentials; each overrides its config file entry.
#[derive(Args, Debug, Default)]
pub struct ChannelTokens {
    /// Telegram bot token.
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_token: Option<String>,
    /// Discord bot token.
    #[arg(long, env = "DISCORD_BOT_TOKEN", hide_env_values = true)]
    pub discord_token: Option<String>,
    /// Slack bot token (xoxb-).
    #[arg(long, env = "SLACK_BOT_TOKEN", hide_env_values = true)]
    pub slack_bot_token: Option<String>,
    /// Slack app-level token for Socket Mode (xapp-).
    #[arg(long, env = "SLACK_APP_TOKEN", hide_env_values = true)]
    pub slack_app_token: Option<String>,
    /// WhatsApp Cloud API access token.
    #[arg(long, env = "WHATSAPP_ACCESS_TOKEN", hide_env_values = true)]
    pub whatsapp_token: Option<String>,
}

#[derive(Args, Debug)]
pub struct ExecToolArgs {
    /// Tool command, e.g. '{"action":"bash","command":"ls"}'.
    pub command: String,
    #[command(flatten)]
    pub mcp: McpArgs,
}

#[derive(Args, Debug, Default)]
pub struct ToolsArgs {
    #[command(flatten)]
    pub mcp: McpArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build information.
    #[arg(long)]
    pub extended: bool,
}
