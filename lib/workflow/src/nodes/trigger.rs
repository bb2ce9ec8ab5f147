//! Trigger node types.

use crate::error::NodeError;
use crate::executor::{NodeContext, NodeDescriptor, NodeHandler, NodeOutput};
use crate::item::{Item, items_from_json};
use crate::node::{ExecutionMode, NodeSettings};
use crate::port::PortSet;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// Seeds a run with its trigger input.
///
/// An array becomes one item per element, null becomes a single empty item,
/// and anything else becomes a single item.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualTrigger;

#[async_trait]
impl NodeHandler for ManualTrigger {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("manual_trigger")
            .with_mode(ExecutionMode::AllItems)
            .trigger()
    }

    fn ports(&self, _parameters: &JsonValue, _settings: &NodeSettings) -> PortSet {
        PortSet::source()
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let items = match ctx.trigger.unwrap_or(JsonValue::Null) {
            JsonValue::Null => vec![Item::empty()],
            other => items_from_json(other),
        };
        Ok(NodeOutput::main(items))
    }
}
