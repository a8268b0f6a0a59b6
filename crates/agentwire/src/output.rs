use std::io::IsTerminal;

use agentwire_rpc::ToolDefinition;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Print `value` as one line of JSON.
pub fn print_json_line<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_tools(tools: &[ToolDefinition], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json_line(&tools),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["NAME", "AVAILABLE", "INPUTS", "DESCRIPTION"]);
            for tool in tools {
                table.add_row(vec![
                    tool.name.clone(),
                    if tool.available { "yes" } else { "no" }.to_string(),
                    schema_inputs(&tool.input_schema),
                    tool.description.clone(),
                ]);
            }
            println!("{table}");
        }
    }
}

/// Property names of an object schema, required ones first.
fn schema_inputs(schema: &serde_json::Value) -> String {
    let Some(properties) = schema["properties"].as_object() else {
        return "-".to_string();
    };
    let required: Vec<&str> = schema["required"]
        .as_array()
        .map(|names| names.iter().filter_map(|n| n.as_str()).collect())
        .unwrap_or_default();

    let mut names: Vec<String> = required.iter().map(|name| name.to_string()).collect();
    names.extend(
        properties
            .keys()
            .filter(|key| !required.contains(&key.as_str()))
            .map(|key| format!("[{key}]")),
    );
    if names.is_empty() {
        "-".to_string()
    } else {
        names.join(", ")
    }
}
