//! Tool registry
//!
//! Handlers are registered during startup through [`ToolRegistryBuilder`];
//! the resulting [`ToolRegistry`] is immutable.

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use super::trait_def::{Tool, ToolKind};
use crate::llm::ToolDefinition;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Tool '{0}' is already registered")]
    Duplicate(String),

    #[error("Tool names must not be empty")]
    EmptyName,
}

#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn Tool>,
    ) -> Result<&mut Self, RegistryError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.tools.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.tools.insert(name, handler);
        Ok(self)
    }

    pub fn build(self) -> ToolRegistry {
        ToolRegistry { tools: self.tools }
    }
}

/// Immutable name → handler table
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::new()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered names, sorted
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Definitions of the selected tools for the reasoning service; `None`
    /// selects all of them
    pub fn as_tool_definitions(&self, only: Option<&[&str]>) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .filter(|(name, _)| only.map_or(true, |names| names.contains(&name.as_str())))
            .map(|(name, tool)| ToolDefinition {
                name: name.clone(),
                description: tool.description().to_string(),
                parameters: tool.schema().to_json_schema(),
            })
            .collect()
    }

    pub fn has_container_tools(&self) -> bool {
        self.tools.values().any(|t| t.kind() == ToolKind::Container)
    }

    /// Names of sandbox-backed tools, sorted
    pub fn container_tool_names(&self) -> Vec<&str> {
        self.tools
            .iter()
            .filter(|(_, tool)| tool.kind() == ToolKind::Container)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ArgumentSchema, ArgumentType, ToolError};
    use async_trait::async_trait;
    use serde_json::{Map, Value};

    struct Noop(ArgumentSchema, ToolKind);

    #[async_trait]
    impl Tool for Noop {
        fn description(&self) -> &str {
            "does nothing"
        }
        fn kind(&self) -> ToolKind {
            self.1
        }
        fn schema(&self) -> &ArgumentSchema {
            &self.0
        }
        async fn execute(&self, _arguments: Map<String, Value>) -> Result<Value, ToolError> {
            Ok(Value::Null)
        }
    }

    fn noop(kind: ToolKind) -> Arc<dyn Tool> {
        Arc::new(Noop(
            ArgumentSchema::new().required("path", ArgumentType::String, "Path"),
            kind,
        ))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut builder = ToolRegistry::builder();
        builder
            .register("read_file", noop(ToolKind::InProcess))
            .unwrap()
            .register("slither", noop(ToolKind::Container))
            .unwrap();
        let registry = builder.build();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.tool_names(), vec!["read_file", "slither"]);
        assert!(registry.get("slither").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert!(registry.has_container_tools());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut builder = ToolRegistry::builder();
        builder.register("slither", noop(ToolKind::Container)).unwrap();
        let err = builder
            .register("slither", noop(ToolKind::Container))
            .err()
            .unwrap();
        assert_eq!(err, RegistryError::Duplicate("slither".into()));
        assert_eq!(
            builder.register("", noop(ToolKind::InProcess)).err(),
            Some(RegistryError::EmptyName)
        );
    }

    #[test]
    fn test_tool_definitions() {
        let mut builder = ToolRegistry::builder();
        builder.register("read_file", noop(ToolKind::InProcess)).unwrap();
        builder.register("slither", noop(ToolKind::Container)).unwrap();
        let registry = builder.build();

        let all = registry.as_tool_definitions(None);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].parameters["required"][0], "path");

        let only = registry.as_tool_definitions(Some(&["slither"]));
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].name, "slither");
        assert!(!ToolRegistry::default().has_container_tools());
    }
}
