//! The node-type contract.
//!
//! Every node type, built-in or connector-backed, is a [`NodeHandler`]. The
//! scheduler never looks inside a handler: it asks for the type's ports, lets
//! it decide whether settled inputs are worth running, and hands it a
//! [`NodeContext`] with resolved parameters and input items.

mod dispatch;
mod registry;

pub(crate) use dispatch::{DispatchRequest, Dispatcher};
pub use registry::NodeRegistry;

use crate::error::NodeError;
use crate::item::{Item, ItemList};
use crate::node::{ExecutionMode, NodeId, NodeSettings};
use crate::port::{MAIN_PORT, PortSet};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use weft_integration::CredentialData;

/// Static facts about a node type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    /// Registered type name.
    pub type_name: String,
    /// Mode used when the node's settings do not override it.
    pub default_mode: ExecutionMode,
    /// Trigger nodes have no inputs and seed the run.
    pub is_trigger: bool,
    /// Output port that feeds a batch loop body, if this type loops.
    pub loop_port: Option<String>,
    /// Metering operation charged once per execution, if any.
    pub operation_key: Option<String>,
}

impl NodeDescriptor {
    /// A per-item node type with no loop and no metering.
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            default_mode: ExecutionMode::EachItem,
            is_trigger: false,
            loop_port: None,
            operation_key: None,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.default_mode = mode;
        self
    }

    #[must_use]
    pub fn trigger(mut self) -> Self {
        self.is_trigger = true;
        self
    }

    #[must_use]
    pub fn with_loop_port(mut self, port: impl Into<String>) -> Self {
        self.loop_port = Some(port.into());
        self
    }

    #[must_use]
    pub fn with_operation_key(mut self, key: impl Into<String>) -> Self {
        self.operation_key = Some(key.into());
        self
    }
}

/// Whether a node with settled inputs should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Run,
    Skip,
}

/// How one input port settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInput {
    pub name: String,
    pub required: bool,
    /// At least one edge targets this port.
    pub connected: bool,
    /// At least one item arrived.
    pub has_data: bool,
}

/// Settled inputs of a node, in port declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputState {
    ports: Vec<PortInput>,
}

impl InputState {
    #[must_use]
    pub fn new(ports: Vec<PortInput>) -> Self {
        Self { ports }
    }

    #[must_use]
    pub fn port(&self, name: &str) -> Option<&PortInput> {
        self.ports.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn has_data(&self, name: &str) -> bool {
        self.port(name).is_some_and(|p| p.has_data)
    }

    /// True if any port carries data.
    #[must_use]
    pub fn any_data(&self) -> bool {
        self.ports.iter().any(|p| p.has_data)
    }

    /// True if every connected port carries data.
    #[must_use]
    pub fn all_connected_have_data(&self) -> bool {
        self.ports.iter().filter(|p| p.connected).all(|p| p.has_data)
    }

    /// Runs when every required connected port has data and any port has data.
    #[must_use]
    pub fn default_readiness(&self) -> Readiness {
        let required_ok = self
            .ports
            .iter()
            .filter(|p| p.required && p.connected)
            .all(|p| p.has_data);
        if required_ok && self.any_data() {
            Readiness::Run
        } else {
            Readiness::Skip
        }
    }
}

/// Parameters after template resolution.
///
/// Per-item nodes hold one value per primary input item; all-items nodes hold
/// exactly one.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParameters {
    values: Vec<JsonValue>,
}

static NULL: JsonValue = JsonValue::Null;

impl ResolvedParameters {
    #[must_use]
    pub fn single(value: JsonValue) -> Self {
        Self {
            values: vec![value],
        }
    }

    #[must_use]
    pub fn per_item(values: Vec<JsonValue>) -> Self {
        Self { values }
    }

    /// Parameters for the item at `index`, clamped to the last resolution.
    #[must_use]
    pub fn for_item(&self, index: usize) -> &JsonValue {
        self.values
            .get(index)
            .or_else(|| self.values.last())
            .unwrap_or(&NULL)
    }

    #[must_use]
    pub fn first(&self) -> &JsonValue {
        self.for_item(0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Deserializes the parameters for one item.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the parameters do not fit `T`.
    pub fn parse<T: DeserializeOwned>(&self, index: usize) -> Result<T, NodeError> {
        parse_parameters(self.for_item(index))
    }
}

/// Deserializes raw or resolved parameters into a typed struct.
///
/// # Errors
///
/// Returns `ValidationError` if the parameters do not fit `T`.
pub fn parse_parameters<T: DeserializeOwned>(value: &JsonValue) -> Result<T, NodeError> {
    let value = if value.is_null() {
        JsonValue::Object(Default::default())
    } else {
        value.clone()
    };
    serde_json::from_value(value).map_err(|e| NodeError::validation(e.to_string()))
}

/// Everything a handler sees for one execution.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub node_id: NodeId,
    pub node_name: String,
    pub parameters: ResolvedParameters,
    /// Items per connected input port.
    pub inputs: HashMap<String, ItemList>,
    /// First declared input port that carries data.
    pub primary_port: Option<String>,
    pub credentials: Option<CredentialData>,
    /// Cursor from this node's previous attempt, for re-entered batch loops.
    pub cursor: Option<JsonValue>,
    /// Run trigger input, given to trigger nodes only.
    pub trigger: Option<JsonValue>,
}

impl NodeContext {
    /// Items on an input port; empty if nothing arrived.
    #[must_use]
    pub fn input(&self, port: &str) -> &[Item] {
        self.inputs.get(port).map_or(&[], Vec::as_slice)
    }

    /// Items on the primary input port.
    #[must_use]
    pub fn primary_items(&self) -> &[Item] {
        self.primary_port
            .as_deref()
            .map_or(&[], |port| self.input(port))
    }
}

/// Items per output port, plus an optional cursor requesting re-entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutput {
    pub ports: BTreeMap<String, ItemList>,
    pub cursor: Option<JsonValue>,
}

impl NodeOutput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Output with items on `main` only.
    #[must_use]
    pub fn main(items: ItemList) -> Self {
        Self::new().with_port(MAIN_PORT, items)
    }

    #[must_use]
    pub fn with_port(mut self, port: impl Into<String>, items: ItemList) -> Self {
        self.ports.insert(port.into(), items);
        self
    }

    #[must_use]
    pub fn with_cursor(mut self, cursor: JsonValue) -> Self {
        self.cursor = Some(cursor);
        self
    }
}

/// Builds a context for handler unit tests; the primary port is the first
/// listed port with items.
#[cfg(test)]
pub(crate) fn test_context(parameters: ResolvedParameters, inputs: Vec<(&str, ItemList)>) -> NodeContext {
    let primary_port = inputs
        .iter()
        .find(|(_, items)| !items.is_empty())
        .map(|(name, _)| (*name).to_string());
    NodeContext {
        node_id: NodeId::new(),
        node_name: "Test".to_string(),
        parameters,
        inputs: inputs
            .into_iter()
            .map(|(name, items)| (name.to_string(), items))
            .collect(),
        primary_port,
        credentials: None,
        cursor: None,
        trigger: None,
    }
}

/// A node type implementation.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Static facts about this type.
    fn descriptor(&self) -> NodeDescriptor;

    /// Ports for a node with these raw parameters.
    fn ports(&self, _parameters: &JsonValue, _settings: &NodeSettings) -> PortSet {
        PortSet::single()
    }

    /// Checks raw parameters when the graph is built.
    fn validate(&self, _parameters: &JsonValue) -> Result<(), NodeError> {
        Ok(())
    }

    /// Decides whether to run once every connected input has settled.
    fn readiness(&self, _parameters: &JsonValue, inputs: &InputState) -> Readiness {
        inputs.default_readiness()
    }

    /// Executes the node.
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;
}
