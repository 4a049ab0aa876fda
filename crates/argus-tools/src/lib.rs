//! Tool registry and dispatch.
//!
//! Tools are declared as data: a [`ToolSpec`] names the tool, types its
//! arguments, carries the risk level that gates approval, and tags
//! results with a display type for client rendering. Dispatch validates
//! arguments against the spec before the handler runs, executes under a
//! hard timeout, and converts handler faults into error results so the
//! ReAct loop only ever observes results.

pub mod builtin;
pub mod dispatch;
pub mod registry;

#[cfg(test)]
mod tests;

pub use dispatch::{dispatch, ToolContext};
pub use registry::ToolRegistry;

use argus_common::types::{DisplayType, RiskLevel};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Default hard timeout for a tool handler.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

/// Argument type constraint.
#[derive(Debug, Clone)]
pub enum ParamKind {
    String {
        /// When set, the value must be one of these.
        enum_values: Option<Vec<String>>,
    },
    Integer {
        min: Option<i64>,
        max: Option<i64>,
    },
    Number {
        min: Option<f64>,
        max: Option<f64>,
    },
    Boolean,
}

/// One declared tool argument.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamSpec {
    pub fn string(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            kind: ParamKind::String { enum_values: None },
            required: false,
        }
    }

    pub fn string_enum(
        name: &'static str,
        description: &'static str,
        values: &[&str],
    ) -> Self {
        Self {
            name,
            description,
            kind: ParamKind::String {
                enum_values: Some(values.iter().map(|s| s.to_string()).collect()),
            },
            required: false,
        }
    }

    pub fn integer(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            kind: ParamKind::Integer {
                min: None,
                max: None,
            },
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn range(mut self, min: i64, max: i64) -> Self {
        if let ParamKind::Integer {
            min: ref mut lo,
            max: ref mut hi,
        } = self.kind
        {
            *lo = Some(min);
            *hi = Some(max);
        }
        self
    }
}

/// Declarative tool description.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
    pub risk: RiskLevel,
    pub display: DisplayType,
    pub timeout_secs: u64,
}

impl ToolSpec {
    pub fn new(
        name: &'static str,
        description: &'static str,
        params: Vec<ParamSpec>,
        risk: RiskLevel,
        display: DisplayType,
    ) -> Self {
        Self {
            name,
            description,
            params,
            risk,
            display,
            timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
        }
    }

    /// JSON-schema object for the LLM tool declaration.
    pub fn json_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required: Vec<Value> = Vec::new();
        for param in &self.params {
            let mut prop = serde_json::Map::new();
            prop.insert("description".to_string(), json!(param.description));
            match &param.kind {
                ParamKind::String { enum_values } => {
                    prop.insert("type".to_string(), json!("string"));
                    if let Some(values) = enum_values {
                        prop.insert("enum".to_string(), json!(values));
                    }
                }
                ParamKind::Integer { min, max } => {
                    prop.insert("type".to_string(), json!("integer"));
                    if let Some(min) = min {
                        prop.insert("minimum".to_string(), json!(min));
                    }
                    if let Some(max) = max {
                        prop.insert("maximum".to_string(), json!(max));
                    }
                }
                ParamKind::Number { min, max } => {
                    prop.insert("type".to_string(), json!("number"));
                    if let Some(min) = min {
                        prop.insert("minimum".to_string(), json!(min));
                    }
                    if let Some(max) = max {
                        prop.insert("maximum".to_string(), json!(max));
                    }
                }
                ParamKind::Boolean => {
                    prop.insert("type".to_string(), json!("boolean"));
                }
            }
            properties.insert(param.name.to_string(), Value::Object(prop));
            if param.required {
                required.push(json!(param.name));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Validate arguments against the spec. Unknown parameters, missing
    /// required parameters, type mismatches, and constraint violations
    /// all fail with a bounded message.
    pub fn validate(&self, args: &Value) -> Result<(), String> {
        let Some(obj) = args.as_object() else {
            return Err("arguments must be a JSON object".to_string());
        };
        for key in obj.keys() {
            if !self.params.iter().any(|p| p.name == key) {
                return Err(format!("unknown parameter: {key}"));
            }
        }
        for param in &self.params {
            let value = obj.get(param.name);
            let Some(value) = value else {
                if param.required {
                    return Err(format!("missing required parameter: {}", param.name));
                }
                continue;
            };
            match &param.kind {
                ParamKind::String { enum_values } => {
                    let Some(s) = value.as_str() else {
                        return Err(format!("parameter {} must be a string", param.name));
                    };
                    if let Some(values) = enum_values {
                        if !values.iter().any(|v| v == s) {
                            return Err(format!(
                                "parameter {} must be one of: {}",
                                param.name,
                                values.join(", ")
                            ));
                        }
                    }
                }
                ParamKind::Integer { min, max } => {
                    let Some(n) = value.as_i64() else {
                        return Err(format!("parameter {} must be an integer", param.name));
                    };
                    if min.is_some_and(|lo| n < lo) || max.is_some_and(|hi| n > hi) {
                        return Err(format!("parameter {} out of range", param.name));
                    }
                }
                ParamKind::Number { min, max } => {
                    let Some(n) = value.as_f64() else {
                        return Err(format!("parameter {} must be a number", param.name));
                    };
                    if min.is_some_and(|lo| n < lo) || max.is_some_and(|hi| n > hi) {
                        return Err(format!("parameter {} out of range", param.name));
                    }
                }
                ParamKind::Boolean => {
                    if !value.is_boolean() {
                        return Err(format!("parameter {} must be a boolean", param.name));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Successful tool output: a display hint plus the structured payload.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub display: DisplayType,
    pub payload: Value,
}

/// Tool failure, observable to the ReAct loop as data.
#[derive(Debug, Clone)]
pub struct ToolError {
    pub code: String,
    pub message: String,
}

impl ToolError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new("invalid_arguments", message)
    }
}

pub type ToolResult = std::result::Result<ToolOutput, ToolError>;

/// A tool implementation. `Send + Sync` so the registry can hand out
/// `Arc<dyn Tool>` across tasks.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    async fn execute(&self, args: Value, ctx: ToolContext) -> ToolResult;
}
