//! Node type registry.

use super::NodeHandler;
use crate::nodes::{
    ConnectorNode, IfNode, JsonParseNode, ManualTrigger, MergeNode, NoOpNode, SetNode,
    SplitInBatchesNode, SwitchNode,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use weft_integration::Connector;

/// Maps node type names to their handlers.
///
/// Populated once at startup; graphs resolve every node type through it when
/// they are built, so an unknown type is a graph error rather than a runtime
/// failure.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl NodeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with all built-in node types.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ManualTrigger));
        registry.register(Arc::new(SetNode));
        registry.register(Arc::new(NoOpNode));
        registry.register(Arc::new(JsonParseNode));
        registry.register(Arc::new(IfNode));
        registry.register(Arc::new(SwitchNode));
        registry.register(Arc::new(MergeNode));
        registry.register(Arc::new(SplitInBatchesNode));
        registry
    }

    /// Registers a handler under its descriptor's type name.
    ///
    /// Returns the handler it replaced, if any.
    pub fn register(&mut self, handler: Arc<dyn NodeHandler>) -> Option<Arc<dyn NodeHandler>> {
        let type_name = handler.descriptor().type_name;
        self.handlers.insert(type_name, handler)
    }

    /// Registers a connector as a node type charged under `operation_key`.
    pub fn register_connector(
        &mut self,
        type_name: impl Into<String>,
        connector: Arc<dyn Connector>,
        operation_key: impl Into<String>,
    ) -> Option<Arc<dyn NodeHandler>> {
        self.register(Arc::new(ConnectorNode::new(
            type_name,
            connector,
            operation_key,
        )))
    }

    /// Looks up a handler.
    #[must_use]
    pub fn get(&self, type_name: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(type_name).cloned()
    }

    #[must_use]
    pub fn contains(&self, type_name: &str) -> bool {
        self.handlers.contains_key(type_name)
    }

    /// Registered type names, sorted.
    #[must_use]
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}
