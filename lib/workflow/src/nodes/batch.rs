//! The batch loop node.

use crate::error::NodeError;
use crate::executor::{NodeContext, NodeDescriptor, NodeHandler, NodeOutput, parse_parameters};
use crate::node::{ExecutionMode, NodeSettings};
use crate::port::{InputPort, MAIN_PORT, PortSet};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

const BATCH_PORT: &str = "batch";
const DONE_PORT: &str = "done";

fn default_batch_size() -> usize {
    10
}

#[derive(Debug, Deserialize)]
struct BatchParams {
    #[serde(default = "default_batch_size")]
    batch_size: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BatchCursor {
    offset: usize,
}

/// Emits its input in batches, one batch per re-entry.
///
/// Each call with items left emits the next batch on `batch` together with a
/// cursor; the scheduler re-enters the node once the loop body has finished.
/// The call that finds nothing left emits every input item on `done`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitInBatchesNode;

#[async_trait]
impl NodeHandler for SplitInBatchesNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("split_in_batches")
            .with_mode(ExecutionMode::AllItems)
            .with_loop_port(BATCH_PORT)
    }

    fn ports(&self, _parameters: &JsonValue, _settings: &NodeSettings) -> PortSet {
        PortSet::new()
            .with_input(InputPort::required(MAIN_PORT))
            .with_output(BATCH_PORT)
            .with_output(DONE_PORT)
    }

    fn validate(&self, parameters: &JsonValue) -> Result<(), NodeError> {
        let params: BatchParams = parse_parameters(parameters)?;
        if params.batch_size == 0 {
            return Err(NodeError::validation("batch_size must be at least 1"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let params: BatchParams = ctx.parameters.parse(0)?;
        let batch_size = params.batch_size.max(1);
        let cursor: BatchCursor = match &ctx.cursor {
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|e| NodeError::validation(format!("invalid batch cursor: {e}")))?,
            None => BatchCursor::default(),
        };

        let items = ctx.primary_items();
        if cursor.offset >= items.len() {
            return Ok(NodeOutput::new().with_port(DONE_PORT, items.to_vec()));
        }

        let end = (cursor.offset + batch_size).min(items.len());
        let next = BatchCursor {
            offset: cursor.offset + batch_size,
        };
        let next = serde_json::to_value(&next).map_err(|e| NodeError::remote(e.to_string()))?;
        Ok(NodeOutput::new()
            .with_port(BATCH_PORT, items[cursor.offset..end].to_vec())
            .with_cursor(next))
    }
}
