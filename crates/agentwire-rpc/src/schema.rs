use jsonschema::Validator;
use serde_json::Value;

use crate::error::{Result, RpcError};

/// Compiled input schema for one tool.
pub struct InputSchema {
    raw: Value,
    validator: Validator,
}

impl InputSchema {
    pub fn compile(tool: &str, schema: Value) -> Result<Self> {
        let validator =
            jsonschema::validator_for(&schema).map_err(|err| RpcError::SchemaCompile {
                tool: tool.to_string(),
                message: err.to_string(),
            })?;
        Ok(Self {
            raw: schema,
            validator,
        })
    }

    /// Validate `input`, reporting at most four violations.
    pub fn validate(&self, tool: &str, input: &Value) -> Result<()> {
        let mut errors = self.validator.iter_errors(input);
        if let Some(first) = errors.next() {
            let mut message = first.to_string();
            for err in errors.take(3) {
                message.push_str("; ");
                message.push_str(&err.to_string());
            }
            return Err(RpcError::InvalidInput {
                tool: tool.to_string(),
                message,
            });
        }
        Ok(())
    }

    pub fn as_value(&self) -> &Value {
        &self.raw
    }
}

impl std::fmt::Debug for InputSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputSchema").field("raw", &self.raw).finish()
    }
}
