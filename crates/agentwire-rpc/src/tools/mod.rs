//! Local tools the device can invoke through `{"type":"tool"}` requests.
//!
//! A [`ToolRegistry`] is built explicitly and handed to the dispatcher. It
//! starts with the built-in set (`bash`, `read_file`, `write_file`, `search`);
//! further tools are added with [`ToolRegistry::register`]. Built-in names are
//! reserved and every name is unique.

mod file;
mod search;
mod shell;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, RpcError};
use crate::message::ToolResult;
use crate::schema::InputSchema;

pub use file::{ReadFileTool, WriteFileTool, MAX_FILE_BYTES};
pub use search::{SearchTool, MAX_SEARCH_LINES};
pub use shell::BashTool;

/// A locally executable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool input, checked before [`execute`](Self::execute).
    fn input_schema(&self) -> Option<Value> {
        None
    }

    /// External executable the tool needs on `PATH`.
    fn requires(&self) -> Option<&str> {
        None
    }

    async fn execute(&self, input: Value) -> Result<ToolResult>;
}

/// Manifest entry describing a registered tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    /// False when a declared executable dependency was not found.
    pub available: bool,
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    schema: Option<InputSchema>,
    missing_dependency: Option<String>,
    builtin: bool,
}

/// Explicitly constructed name → tool table.
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// A registry holding only the built-in tools.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        let builtins: [Arc<dyn Tool>; 4] = [
            Arc::new(BashTool::default()),
            Arc::new(ReadFileTool),
            Arc::new(WriteFileTool),
            Arc::new(SearchTool::default()),
        ];
        for tool in builtins {
            if let Err(err) = registry.insert(tool, true) {
                warn!(error = %err, "failed to register built-in tool");
            }
        }
        registry
    }

    /// A registry with no tools at all.
    pub fn empty() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Add an extension tool.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        if let Some(existing) = self.tools.get(tool.name()) {
            if existing.builtin {
                return Err(RpcError::BuiltinOverride(tool.name().to_string()));
            }
            return Err(RpcError::DuplicateTool(tool.name().to_string()));
        }
        self.insert(tool, false)
    }

    fn insert(&mut self, tool: Arc<dyn Tool>, builtin: bool) -> Result<()> {
        let name = tool.name().to_string();
        let schema = tool
            .input_schema()
            .map(|schema| InputSchema::compile(&name, schema))
            .transpose()?;
        let missing_dependency = tool
            .requires()
            .filter(|program| find_executable(program).is_none())
            .map(str::to_string);
        if let Some(program) = &missing_dependency {
            warn!(tool = %name, program, "tool dependency not found on PATH; tool unavailable");
        }

        debug!(tool = %name, builtin, "registered tool");
        self.tools.insert(
            name,
            RegisteredTool {
                tool,
                schema,
                missing_dependency,
                builtin,
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.tools.get(name).is_some_and(|t| t.builtin)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Manifests for every registered tool, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|(name, entry)| ToolDefinition {
                name: name.clone(),
                description: entry.tool.description().to_string(),
                input_schema: entry
                    .schema
                    .as_ref()
                    .map(|s| s.as_value().clone())
                    .unwrap_or_else(|| serde_json::json!({"type": "object"})),
                available: entry.missing_dependency.is_none(),
            })
            .collect()
    }

    /// Run `name` with `input`. Never fails: every problem becomes an error result.
    pub async fn execute(&self, name: &str, input: Value) -> ToolResult {
        let Some(entry) = self.tools.get(name) else {
            return ToolResult::error(format!("Unknown tool: {name}"));
        };
        if let Some(program) = &entry.missing_dependency {
            return ToolResult::error(format!(
                "Tool unavailable: {name} requires `{program}` on PATH"
            ));
        }
        if let Some(schema) = &entry.schema {
            if let Err(err) = schema.validate(name, &input) {
                return err.into();
            }
        }

        match entry.tool.execute(input).await {
            Ok(result) => result,
            Err(err) => {
                debug!(tool = %name, error = %err, "tool failed");
                err.into()
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Locate `program` on `PATH` (or accept it as given when it contains a separator).
pub fn find_executable(program: &str) -> Option<PathBuf> {
    let candidate = PathBuf::from(program);
    if candidate.components().count() > 1 {
        return is_executable(&candidate).then_some(candidate);
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|p| is_executable(p))
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &std::path::Path) -> bool {
    path.is_file()
}

/// Pull a typed input struct out of a JSON value.
pub(crate) fn parse_input<T: serde::de::DeserializeOwned>(tool: &str, input: Value) -> Result<T> {
    serde_json::from_value(input).map_err(|err| RpcError::InvalidInput {
        tool: tool.to_string(),
        message: err.to_string(),
    })
}
