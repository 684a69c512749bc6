use super::error::ToolError;
use super::schema::ArgumentSchema;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Where a handler does its work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Runs an image through the container sandbox
    Container,
    /// Runs inside this process
    InProcess,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn description(&self) -> &str;
    fn kind(&self) -> ToolKind;
    fn schema(&self) -> &ArgumentSchema;

    /// Runs with arguments already validated against [`Tool::schema`]
    async fn execute(&self, arguments: Map<String, Value>) -> Result<Value, ToolError>;
}
