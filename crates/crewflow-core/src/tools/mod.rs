//! Capabilities an agent may invoke while working on a task.

mod file_writer;
mod search;

pub use file_writer::{FileWriterTool, write_file};
pub use search::{SearchHit, SearchProvider, SerperSearch, WebSearchTool};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

pub const SEARCH_TOOL: &str = "search";
pub const FILE_WRITER_TOOL: &str = "file_writer";

/// Name and usage hint advertised to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_hint: String,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    async fn invoke(&self, input: &str) -> Result<String, ToolError>;
}

/// Tools available to agents, looked up by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.descriptor().name;
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Descriptors for the given names, skipping any that are not registered.
    pub fn descriptors(&self, names: &[String]) -> Vec<ToolDescriptor> {
        names
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.descriptor())
            .collect()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "echo".into(),
                description: "Repeat the input.".into(),
                input_hint: "any text".into(),
            }
        }

        async fn invoke(&self, input: &str) -> Result<String, ToolError> {
            Ok(input.to_string())
        }
    }

    #[tokio::test]
    async fn registry_resolves_by_name() {
        let registry = ToolRegistry::new().with_tool(Arc::new(Echo));
        assert!(registry.contains("echo"));
        assert!(!registry.contains("search"));

        let tool = registry.get("echo").unwrap();
        assert_eq!(tool.invoke("hi").await.unwrap(), "hi");

        let descriptors = registry.descriptors(&["echo".to_string(), "missing".to_string()]);
        assert_eq!(descriptors.len(), 1);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["echo"]);
    }
}
