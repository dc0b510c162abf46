//! Tools offered to the model: in-process local tools plus the merged
//! catalog of remote provider tools.

pub mod console;
pub mod errors;
pub mod interaction;
pub mod mysql_execution;
pub mod registry;

use async_trait::async_trait;

use crate::inference::ToolDefinition;

pub use console::Console;
pub use errors::ToolError;
pub use interaction::Interaction;
pub use mysql_execution::{DatabaseCache, MysqlExecution};
pub use registry::{derive_tool_key, RetryPolicy, ToolRegistry};

/// Provider name under which local tools are catalogued.
pub const LOCAL_PROVIDER: &str = "local-tool";

/// An in-process tool.
#[async_trait]
pub trait LocalTool: Send + Sync {
    /// Name, also used directly as the tool key.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema of the arguments object.
    fn input_schema(&self) -> serde_json::Value;

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError>;

    /// Release held resources at process exit.
    async fn shutdown(&self) {}
}

/// One entry in the merged catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInfo {
    /// Name the model calls the tool by.
    pub tool_key: String,
    pub server_name: String,
    pub tool_name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl ToolInfo {
    pub fn from_local(tool: &dyn LocalTool) -> Self {
        Self {
            tool_key: tool.name().to_string(),
            server_name: LOCAL_PROVIDER.to_string(),
            tool_name: tool.name().to_string(),
            description: tool.description().to_string(),
            input_schema: tool.input_schema(),
        }
    }

    /// Function definition sent to the model.
    pub fn definition(&self) -> ToolDefinition {
        let parameters = if self.input_schema.is_object() {
            self.input_schema.clone()
        } else {
            serde_json::json!({ "type": "object", "properties": {} })
        };
        ToolDefinition::function(&self.tool_key, &self.description, parameters)
    }
}

/// Required string field of an arguments object.
pub(crate) fn required_str<'a>(
    tool: &str,
    arguments: &'a serde_json::Value,
    field: &str,
) -> Result<&'a str, ToolError> {
    arguments
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: format!("missing required string '{field}'"),
        })
}
