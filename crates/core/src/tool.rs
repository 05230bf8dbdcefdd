//! Tool trait and registry.
//!
//! The registry is an explicit dispatch table of `name → (specification,
//! handler)`. Handlers are either full [`Tool`] implementations or plain
//! closures registered with [`ToolRegistry::register_fn`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ToolError;

/// Type of a single tool parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array(Box<ParamType>),
}

impl ParamType {
    /// A list of strings, the most common shape for search parameters.
    pub fn string_array() -> Self {
        ParamType::Array(Box::new(ParamType::String))
    }

    /// Human label used in emulated tool instructions ("array of string").
    pub fn label(&self) -> String {
        match self {
            ParamType::String => "string".into(),
            ParamType::Integer => "integer".into(),
            ParamType::Number => "number".into(),
            ParamType::Boolean => "boolean".into(),
            ParamType::Array(item) => format!("array of {}", item.label()),
        }
    }

    fn json_schema(&self, description: &str) -> serde_json::Value {
        let mut schema = match self {
            ParamType::Array(item) => serde_json::json!({
                "type": "array",
                "items": item.json_schema(""),
            }),
            other => serde_json::json!({ "type": other.label() }),
        };
        if !description.is_empty() {
            schema["description"] = serde_json::Value::String(description.to_string());
        }
        schema
    }
}

/// One named parameter of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamType,
    pub description: String,
    pub required: bool,
}

/// Name, description and parameter schema of a tool, as shown to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpecification {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,
}

impl ToolSpecification {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Add a required parameter.
    pub fn param(mut self, name: impl Into<String>, kind: ParamType, description: impl Into<String>) -> Self {
        self.parameters.push(ParamSpec {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
        });
        self
    }

    /// Add an optional parameter.
    pub fn optional_param(
        mut self,
        name: impl Into<String>,
        kind: ParamType,
        description: impl Into<String>,
    ) -> Self {
        self.parameters.push(ParamSpec {
            name: name.into(),
            kind,
            description: description.into(),
            required: false,
        });
        self
    }

    /// JSON Schema object describing the parameters, for native function calling.
    pub fn json_schema(&self) -> serde_json::Value {
        let properties: serde_json::Map<String, serde_json::Value> = self
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.kind.json_schema(&p.description)))
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// A request to execute a tool, as emitted by the model or forged by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique call ID (matches the model's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON object
    pub arguments: serde_json::Value,
}

impl ToolCallRequest {
    /// Build a request with a fresh call ID.
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("call_{}", &id[..12]),
            name: name.into(),
            arguments,
        }
    }

    /// A string argument, if present.
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(|v| v.as_str())
    }

    /// A list-of-strings argument. A bare string is treated as a one-element list.
    pub fn arg_strings(&self, key: &str) -> Vec<String> {
        match self.arguments.get(key) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            Some(serde_json::Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool produced something useful
    pub success: bool,

    /// The output content
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            success: true,
            output: output.into(),
            data: None,
        }
    }

    /// A result that executed fine but found nothing.
    pub fn empty(output: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            success: false,
            output: output.into(),
            data: None,
        }
    }
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "searchSymbols").
    fn name(&self) -> &str;

    /// Name, description and parameter schema shown to the model.
    fn specification(&self) -> ToolSpecification;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError>;
}

type ToolFn = dyn Fn(&serde_json::Value) -> std::result::Result<ToolResult, ToolError> + Send + Sync;

/// A tool backed by a synchronous closure.
struct FnTool {
    spec: ToolSpecification,
    handler: Box<ToolFn>,
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn specification(&self) -> ToolSpecification {
        self.spec.clone()
    }

    async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError> {
        (self.handler)(&arguments)
    }
}

/// A registry of available tools.
///
/// The agent loop uses this to:
/// 1. Get the specifications of the tools it permits this turn
/// 2. Look up and execute tools when the model requests them
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Register a closure as the handler for `spec`.
    pub fn register_fn<F>(&mut self, spec: ToolSpecification, handler: F)
    where
        F: Fn(&serde_json::Value) -> std::result::Result<ToolResult, ToolError> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnTool {
            spec,
            handler: Box::new(handler),
        }));
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Specifications for the named tools, in the order asked. Unknown names are skipped.
    pub fn list_specs(&self, names: &[&str]) -> Vec<ToolSpecification> {
        names
            .iter()
            .filter_map(|name| self.tools.get(*name).map(|t| t.specification()))
            .collect()
    }

    /// Execute a tool call.
    ///
    /// Required parameters are checked against the tool's specification
    /// before the handler runs.
    pub async fn execute(&self, call: &ToolCallRequest) -> std::result::Result<ToolResult, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| {
                tracing::debug!(tool = %call.name, "Unknown tool requested");
                ToolError::NotFound(call.name.clone())
            })?;

        if !call.arguments.is_object() {
            return Err(ToolError::InvalidArguments(format!(
                "arguments for {} must be a JSON object",
                call.name
            )));
        }
        let spec = tool.specification();
        if let Some(missing) = spec
            .parameters
            .iter()
            .find(|p| p.required && call.arguments.get(&p.name).is_none_or(|v| v.is_null()))
        {
            return Err(ToolError::InvalidArguments(format!(
                "Missing required parameter: {}",
                missing.name
            )));
        }

        tracing::trace!(tool = %call.name, call_id = %call.id, "Executing tool");
        let mut result = tool.execute(call.arguments.clone()).await?;
        result.call_id = call.id.clone();
        Ok(result)
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}
