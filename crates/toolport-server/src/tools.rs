//! Tool trait and the built-in tools every instance exposes.

use std::future::Future;
use std::pin::Pin;

use serde_json::{Value, json};
use toolport_registry::{RegistryError, RegistryStore};

/// Failure inside a tool. Rendered in-band as an error result, never as a
/// transport failure.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {0} is already registered")]
    Duplicate(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

/// Text content returned by a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }

    pub fn json(value: &Value) -> Result<Self, ToolError> {
        Ok(Self::text(serde_json::to_string_pretty(value)?))
    }

    /// The `tools/call` result shape.
    pub fn into_result(self) -> Value {
        let mut result = json!({
            "content": [{ "type": "text", "text": self.text }],
        });
        if self.is_error {
            result["isError"] = Value::Bool(true);
        }
        result
    }
}

/// A callable tool.
pub trait Tool: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the `arguments` object.
    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    fn call(&self, arguments: Value) -> impl Future<Output = Result<ToolOutput, ToolError>> + Send;
}

/// Object-safe wrapper for the Tool trait.
pub(crate) trait ToolDyn: Send + Sync {
    fn name_dyn(&self) -> &str;
    fn description_dyn(&self) -> &str;
    fn input_schema_dyn(&self) -> Value;
    fn call_dyn(
        &self,
        arguments: Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + '_>>;
}

impl<T: Tool> ToolDyn for T {
    fn name_dyn(&self) -> &str {
        self.name()
    }
    fn description_dyn(&self) -> &str {
        self.description()
    }
    fn input_schema_dyn(&self) -> Value {
        self.input_schema()
    }
    fn call_dyn(
        &self,
        arguments: Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + '_>> {
        Box::pin(self.call(arguments))
    }
}

/// Lists the instances registered in the router table.
pub struct ListWorkspacesTool {
    registry: RegistryStore,
}

impl ListWorkspacesTool {
    pub const NAME: &str = "listWorkspaces";

    pub fn new(registry: RegistryStore) -> Self {
        Self { registry }
    }
}

impl Tool for ListWorkspacesTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "List the projects that currently have a running tool server, with the port each one listens on."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn call(&self, _arguments: Value) -> Result<ToolOutput, ToolError> {
        let entries = self.registry.list().await;
        ToolOutput::json(&serde_json::to_value(entries)?)
    }
}
