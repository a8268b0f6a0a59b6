use crate::cmd::ToolsArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_tools, OutputFormat};

pub async fn run(args: ToolsArgs, format: OutputFormat) -> CliResult<i32> {
    let (registry, bridge) = args.mcp.registry().await;
    print_tools(&registry.definitions(), format);
    bridge.shutdown().await;
    Ok(SUCCESS)
}
