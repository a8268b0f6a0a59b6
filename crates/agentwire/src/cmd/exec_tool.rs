use agentwire_rpc::mcp::{MCP_CALL, MCP_LIST_TOOLS, TOOL_SEPARATOR};
use agentwire_rpc::{McpBridge, ToolRegistry};
use serde_json::{json, Map, Value};

use crate::cmd::ExecToolArgs;
use crate::exit::{CliResult, FAILURE, SUCCESS};
use crate::output::print_json_line;

/// Run one tool command.
///
/// The command is a JSON object whose `action` names the tool; the remaining
/// fields are the tool input. Prints one JSON line and exits 1 when the
/// command is invalid or the tool reports an error. MCP servers are only
/// started for MCP actions.
pub async fn run(args: ExecToolArgs) -> CliResult<i32> {
    let (registry, bridge) = if wants_mcp(&args.command) {
        args.mcp.registry().await
    } else {
        (ToolRegistry::new(), McpBridge::default())
    };
    let (code, output) = execute(&registry, &args.command).await;
    bridge.shutdown().await;
    print_json_line(&output);
    Ok(code)
}

/// True for `mcp_call`, `mcp_list_tools` and namespaced `server__tool` actions.
fn wants_mcp(command: &str) -> bool {
    serde_json::from_str::<Value>(command)
        .ok()
        .and_then(|value| value.get("action").and_then(Value::as_str).map(str::to_string))
        .is_some_and(|action| {
            action == MCP_CALL || action == MCP_LIST_TOOLS || action.contains(TOOL_SEPARATOR)
        })
}

async fn execute(registry: &ToolRegistry, command: &str) -> (i32, Value) {
    let mut input: Map<String, Value> = match serde_json::from_str(command) {
        Ok(input) => input,
        Err(err) => return (FAILURE, json!({"error": format!("invalid JSON: {err}")})),
    };
    let action = match input.remove("action") {
        Some(Value::String(action)) => action,
        _ => String::new(),
    };
    if !registry.contains(&action) {
        return (FAILURE, json!({"error": format!("Unknown action: {action}")}));
    }

    let result = registry.execute(&action, Value::Object(input)).await;
    let code = if result.is_error { FAILURE } else { SUCCESS };
    (code, json!(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_named_tool_with_remaining_fields() {
        let (code, output) = execute(
            &ToolRegistry::new(),
            r#"{"action":"bash","command":"echo hi"}"#,
        )
        .await;
        assert_eq!(code, SUCCESS);
        assert_eq!(
            output,
            json!({"type": "tool_result", "output": "hi\n", "is_error": false})
        );
    }

    #[tokio::test]
    async fn unknown_action_and_bad_json_fail() {
        let registry = ToolRegistry::new();

        let (code, output) = execute(&registry, r#"{"action":"teleport"}"#).await;
        assert_eq!(code, FAILURE);
        assert_eq!(output, json!({"error": "Unknown action: teleport"}));

        let (code, output) = execute(&registry, "{oops").await;
        assert_eq!(code, FAILURE);
        assert!(output["error"].as_str().unwrap().starts_with("invalid JSON"));

        let (code, _) = execute(&registry, r#"["bash"]"#).await;
        assert_eq!(code, FAILURE);
    }

    #[test]
    fn only_mcp_actions_start_servers() {
        assert!(wants_mcp(r#"{"action":"mcp_call","tool":"kit__echo"}"#));
        assert!(wants_mcp(r#"{"action":"mcp_list_tools"}"#));
        assert!(wants_mcp(r#"{"action":"kit__echo","text":"hi"}"#));
        assert!(!wants_mcp(r#"{"action":"bash","command":"ls"}"#));
        assert!(!wants_mcp("not json"));
    }

    #[tokio::test]
    async fn tool_error_exits_one() {
        let (code, output) = execute(
            &ToolRegistry::new(),
            r#"{"action":"read_file","path":"/definitely/not/here"}"#,
        )
        .await;
        assert_eq!(code, FAILURE);
        assert_eq!(output["is_error"], true);
    }
}
