//! Pure transform node types: one `main` input, one `main` output.

use super::{get_path, set_path};
use crate::error::NodeError;
use crate::executor::{NodeContext, NodeDescriptor, NodeHandler, NodeOutput, parse_parameters};
use crate::item::Item;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};

#[derive(Debug, Deserialize)]
struct SetParams {
    #[serde(default)]
    fields: Map<String, JsonValue>,
    #[serde(default)]
    keep_only_set: bool,
}

/// Assigns fields on every item. Dotted names create nested objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetNode;

#[async_trait]
impl NodeHandler for SetNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("set")
    }

    fn validate(&self, parameters: &JsonValue) -> Result<(), NodeError> {
        parse_parameters::<SetParams>(parameters).map(|_| ())
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let mut items = Vec::with_capacity(ctx.primary_items().len());
        for (index, item) in ctx.primary_items().iter().enumerate() {
            let params: SetParams = ctx.parameters.parse(index)?;
            let mut map = if params.keep_only_set {
                Map::new()
            } else {
                item.clone().into_object()
            };
            for (path, value) in params.fields {
                set_path(&mut map, &path, value);
            }
            items.push(Item::from(map));
        }
        Ok(NodeOutput::main(items))
    }
}

/// Passes items through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpNode;

#[async_trait]
impl NodeHandler for NoOpNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("no_op")
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::main(ctx.primary_items().to_vec()))
    }
}

fn default_field() -> String {
    "data".to_string()
}

#[derive(Debug, Deserialize)]
struct JsonParseParams {
    #[serde(default = "default_field")]
    field: String,
    #[serde(default)]
    target: Option<String>,
}

/// Parses a string field into JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParseNode;

#[async_trait]
impl NodeHandler for JsonParseNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("json_parse")
    }

    fn validate(&self, parameters: &JsonValue) -> Result<(), NodeError> {
        parse_parameters::<JsonParseParams>(parameters).map(|_| ())
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let mut items = Vec::with_capacity(ctx.primary_items().len());
        for (index, item) in ctx.primary_items().iter().enumerate() {
            let params: JsonParseParams = ctx.parameters.parse(index)?;
            let raw = match get_path(item.json(), &params.field) {
                Some(JsonValue::String(raw)) => raw,
                Some(_) => {
                    return Err(NodeError::validation(format!(
                        "field '{}' of item {index} is not a string",
                        params.field
                    )));
                }
                None => {
                    return Err(NodeError::validation(format!(
                        "item {index} has no field '{}'",
                        params.field
                    )));
                }
            };
            let parsed: JsonValue = serde_json::from_str(raw).map_err(|e| {
                NodeError::validation(format!("item {index}: invalid JSON in '{}': {e}", params.field))
            })?;

            let mut map = item.clone().into_object();
            let target = params.target.as_deref().unwrap_or(&params.field);
            set_path(&mut map, target, parsed);
            items.push(Item::from(map));
        }
        Ok(NodeOutput::main(items))
    }
}
