#![cfg(unix)]

use std::process::{Command, Output};

use serde_json::Value;

fn agentwire(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_agentwire"))
        .args(["--log-level", "error"])
        .args(args)
        .env_remove("ANTHROPIC_API_KEY")
        .env_remove("RUST_LOG")
        .env("AGENTWIRE_MCP_CONFIG", "/nonexistent/agentwire/mcp_servers.json")
        .output()
        .expect("agentwire should run")
}

fn stdout_json(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().next().expect("one line of output");
    serde_json::from_str(line).expect("stdout should be JSON")
}

#[test]
fn exec_tool_prints_one_json_line() {
    let output = agentwire(&["exec-tool", r#"{"action":"bash","command":"echo hi"}"#]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).lines().count(), 1);
    assert_eq!(
        stdout_json(&output),
        serde_json::json!({"type": "tool_result", "output": "hi\n", "is_error": false})
    );
}

#[test]
fn exec_tool_unknown_action_exits_1() {
    let output = agentwire(&["exec-tool", r#"{"action":"warp"}"#]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(stdout_json(&output)["error"], "Unknown action: warp");
}

#[test]
fn exec_tool_invalid_json_exits_1() {
    let output = agentwire(&["exec-tool", "not json"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout_json(&output)["error"]
        .as_str()
        .expect("error string")
        .starts_with("invalid JSON"));
}

#[test]
fn tools_lists_builtins_as_json() {
    let output = agentwire(&["--format", "json", "tools"]);
    assert!(output.status.success());
    let tools = stdout_json(&output);
    let names: Vec<&str> = tools
        .as_array()
        .expect("tool list")
        .iter()
        .filter_map(|tool| tool["name"].as_str())
        .collect();
    assert_eq!(names, vec!["bash", "read_file", "search", "write_file"]);
}

#[test]
fn tools_table_has_header() {
    let output = agentwire(&["--format", "table", "tools"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("NAME"));
    assert!(stdout.contains("read_file"));
}

#[test]
fn version_prints_package_version() {
    let output = agentwire(&["version"]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("agentwire {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn device_without_link_exits_1() {
    let output = agentwire(&["device"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("exactly one"));
}

#[test]
fn device_with_two_links_exits_1() {
    let output = agentwire(&["device", "--socket", "/tmp/aw-two.sock", "--radio"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn missing_api_key_exits_1() {
    let output = agentwire(&["device", "--socket", "/tmp/aw-nokey.sock"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("ANTHROPIC_API_KEY"));

    let output = agentwire(&["serve", "--channels", "webhook"]);
    assert_eq!(output.status.code(), Some(1));
}

/// One-tool MCP server speaking JSON-RPC over stdio.
const ECHO_SERVER: &str = r#"while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*) printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
    *'"method":"tools/list"'*) printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo"}]}}\n' "$id" ;;
    *'"method":"tools/call"'*) printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$id" ;;
  esac
done"#;

fn mcp_config_file(tag: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("aw-mcp-{tag}-{}.json", std::process::id()));
    let config = serde_json::json!({
        "mcpServers": {"kit": {"command": "sh", "args": ["-c", ECHO_SERVER]}}
    });
    std::fs::write(&path, config.to_string()).expect("temp file should be writable");
    path
}

#[test]
fn tools_include_bridged_mcp_tools() {
    let config = mcp_config_file("tools");
    let path = config.to_str().expect("utf-8 temp path");
    let output = agentwire(&["--format", "json", "tools", "--mcp-config", path]);
    assert!(output.status.success());
    let tools = stdout_json(&output);
    let names: Vec<&str> = tools
        .as_array()
        .expect("tool list")
        .iter()
        .filter_map(|tool| tool["name"].as_str())
        .collect();
    assert!(names.contains(&"kit__echo"), "{names:?}");
    assert!(names.contains(&"mcp_call"), "{names:?}");

    let output = agentwire(&["--format", "json", "tools", "--mcp-config", path, "--no-mcp"]);
    assert_eq!(stdout_json(&output).as_array().map(Vec::len), Some(4));
    let _ = std::fs::remove_file(config);
}

#[test]
fn exec_tool_routes_mcp_call() {
    let config = mcp_config_file("exec");
    let path = config.to_str().expect("utf-8 temp path");
    let output = agentwire(&[
        "exec-tool",
        "--mcp-config",
        path,
        r#"{"action":"mcp_call","tool":"kit__echo","arguments":{}}"#,
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(
        stdout_json(&output),
        serde_json::json!({"type": "tool_result", "output": "pong", "is_error": false})
    );

    let output = agentwire(&["exec-tool", "--mcp-config", path, r#"{"action":"mcp_list_tools"}"#]);
    let listed: Value =
        serde_json::from_str(stdout_json(&output)["output"].as_str().expect("output text"))
            .expect("listing should be JSON");
    assert_eq!(listed["count"], 1);
    let _ = std::fs::remove_file(config);
}
